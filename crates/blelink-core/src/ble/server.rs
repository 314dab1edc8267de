//! GATT Server - 广播服务并响应特征读取
//!
//! # 功能
//!
//! - 把适配器名称设为对端名称并广播服务 UUID
//! - 注册一个服务，包含一个 READ | NOTIFY 特征
//! - 对读请求返回当前特征值在请求偏移量之后的部分
//!
//! 特征值可以在运行中通过 [`SharedPayload::set`] 修改，每次读请求取一份完整快照。
//! 未知特征的读请求不作答，请求方会超时。

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::ble::adapter::RadioAdapter;
use crate::ble::advertiser::BleAdvertiser;
use crate::ble::gatt::{GattServiceSpec, ReadRequest, ReadResponse};
use crate::ble::listener::BleListener;
use crate::ble::peripheral::{PeripheralRadio, ServerEvent};
use crate::ble::{ADAPTER_UNAVAILABLE, CHAR_UUID, DEFAULT_PAYLOAD, LinkState, PEER_NAME};
use crate::error::BleError;

/// 服务端共享的特征值
#[derive(Debug, Clone)]
pub struct SharedPayload {
    value: Arc<RwLock<String>>,
}

impl SharedPayload {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Arc::new(RwLock::new(value.into())),
        }
    }

    pub async fn set(&self, value: impl Into<String>) {
        *self.value.write().await = value.into();
    }

    pub async fn get(&self) -> String {
        self.value.read().await.clone()
    }

    /// 当前值的 UTF-8 字节
    pub async fn snapshot(&self) -> Vec<u8> {
        self.value.read().await.as_bytes().to_vec()
    }
}

impl Default for SharedPayload {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD)
    }
}

/// GATT Server 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    AwaitingEnable,
    Running,
}

pub struct BleServer {
    adapter: Arc<dyn RadioAdapter>,
    peripheral: Arc<dyn PeripheralRadio>,
    advertiser: BleAdvertiser,
    listener: Option<Arc<dyn BleListener>>,
    payload: SharedPayload,
    state: ServerState,
    gatt_open: bool,
}

impl BleServer {
    pub fn new(adapter: Arc<dyn RadioAdapter>, peripheral: Arc<dyn PeripheralRadio>) -> Self {
        Self::with_local_name(adapter, peripheral, PEER_NAME)
    }

    pub fn with_local_name(
        adapter: Arc<dyn RadioAdapter>,
        peripheral: Arc<dyn PeripheralRadio>,
        local_name: impl Into<String>,
    ) -> Self {
        let advertiser = BleAdvertiser::new(peripheral.clone(), local_name);
        Self {
            adapter,
            peripheral,
            advertiser,
            listener: None,
            payload: SharedPayload::default(),
            state: ServerState::Stopped,
            gatt_open: false,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn BleListener>) {
        self.listener = Some(listener);
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// 特征值句柄，可在其他任务中修改
    pub fn payload(&self) -> SharedPayload {
        self.payload.clone()
    }

    pub async fn set_data(&self, data: impl Into<String>) {
        self.payload.set(data).await;
    }

    /// 启动服务端
    ///
    /// 广播失败不影响启动；GATT Server 打不开时返回错误。
    pub async fn start(&mut self) -> Result<(), BleError> {
        if self.state != ServerState::Stopped {
            return Err(BleError::AlreadyActive("server"));
        }

        if !self.adapter.is_available().await {
            self.state = ServerState::Stopped;
            if let Some(l) = &self.listener {
                l.on_error(ADAPTER_UNAVAILABLE);
            }
            return Ok(());
        }

        if !self.adapter.is_enabled().await {
            self.state = ServerState::AwaitingEnable;
            if let Some(l) = &self.listener {
                l.enable_bluetooth();
            }
            return Ok(());
        }

        self.advertiser.start().await;

        if let Err(e) = self.init_gatt_server().await {
            self.advertiser.stop().await;
            return Err(e);
        }

        self.state = ServerState::Running;
        Ok(())
    }

    async fn init_gatt_server(&mut self) -> Result<(), BleError> {
        self.peripheral
            .open_gatt_server(&GattServiceSpec::exchange())
            .await?;
        self.gatt_open = true;
        info!("Gatt server initialized");
        Ok(())
    }

    /// 开启蓝牙请求的结果，成功时重新执行启动流程
    pub async fn on_enable_result(&mut self, enabled: bool) -> Result<(), BleError> {
        if self.state != ServerState::AwaitingEnable {
            debug!("Ignoring enable result in state {:?}", self.state);
            return Ok(());
        }
        self.state = ServerState::Stopped;
        if enabled {
            info!("Bluetooth enabled, restarting server");
            self.start().await
        } else {
            warn!("Bluetooth enable request was denied");
            Ok(())
        }
    }

    pub async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ConnectionStateChanged { device, state } => match state {
                LinkState::Connected => info!("Device connected: {}", device),
                LinkState::Disconnected => info!("Device disconnected: {}", device),
            },
            ServerEvent::ReadRequest(request) => self.on_read_request(&request).await,
        }
    }

    async fn on_read_request(&self, request: &ReadRequest) {
        debug!(
            "onCharacteristicReadRequest id={} offset={} from {}",
            request.request_id, request.offset, request.device
        );
        if request.characteristic != CHAR_UUID {
            warn!(
                "Dropping read request {} for unknown characteristic {}",
                request.request_id, request.characteristic
            );
            return;
        }

        let payload = self.payload.snapshot().await;
        let response = ReadResponse::for_request(request, &payload);
        if !response.status.is_success() {
            warn!(
                "Read request {} offset {} is past payload length {}",
                request.request_id,
                request.offset,
                payload.len()
            );
        }
        if let Err(e) = self.peripheral.send_response(response).await {
            warn!("Failed to send response {}: {}", request.request_id, e);
        }
    }

    /// 停止服务端，任何状态下都可调用，不会失败
    pub async fn stop(&mut self) {
        self.advertiser.stop().await;
        if self.gatt_open {
            self.gatt_open = false;
            if let Err(e) = self.peripheral.close_gatt_server().await {
                debug!("Ignoring close_gatt_server error: {}", e);
            }
        }
        self.state = ServerState::Stopped;
    }
}
