//! BLE Client - 扫描、连接并读取服务端特征
//!
//! 流程:
//! 1. 检查适配器，未开启时请求上层开启
//! 2. 按服务 UUID 扫描，设备名称匹配后停止扫描并连接
//! 3. 连接成功后发现服务
//! 4. 服务发现成功后读取特征
//! 5. 读取成功后把文本交给监听器并释放连接
//!
//! 无线回调以 [`ClientEvent`] 的形式逐条交给 [`BleClient::handle_event`]，
//! 处理顺序就是收件箱顺序。连接后的失败不会重试，状态停在原地。

use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::ble::adapter::RadioAdapter;
use crate::ble::central::{CentralRadio, ClientEvent};
use crate::ble::gatt::{GattStatus, decode_payload};
use crate::ble::listener::{BleListener, SessionFailure};
use crate::ble::scanner::Scanner;
use crate::ble::{
    ADAPTER_UNAVAILABLE, AdvertisementRecord, CHAR_UUID, ConnectionHandle, LinkState, PEER_NAME,
    SERVICE_UUID,
};
use crate::error::BleError;

/// 客户端连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// 初始状态，也是连接断开或 `stop` 之后的状态
    Disconnected,
    AwaitingEnable,
    Scanning,
    Connecting,
    Connected,
    ServicesDiscovering,
    ServicesDiscovered,
    ReadInFlight,
    ReadComplete,
}

impl ConnectionState {
    /// 会话进行中（含等待开启蓝牙和停滞在失败处的状态）
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::AwaitingEnable
                | ConnectionState::Scanning
                | ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::ServicesDiscovering
                | ConnectionState::ServicesDiscovered
                | ConnectionState::ReadInFlight
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct BleClient {
    adapter: Arc<dyn RadioAdapter>,
    central: Arc<dyn CentralRadio>,
    scanner: Scanner,
    listener: Option<Arc<dyn BleListener>>,
    state: ConnectionState,
    connection: Option<ConnectionHandle>,
}

impl BleClient {
    pub fn new(adapter: Arc<dyn RadioAdapter>, central: Arc<dyn CentralRadio>) -> Self {
        Self::with_peer_name(adapter, central, PEER_NAME)
    }

    pub fn with_peer_name(
        adapter: Arc<dyn RadioAdapter>,
        central: Arc<dyn CentralRadio>,
        peer_name: impl Into<String>,
    ) -> Self {
        let scanner = Scanner::new(central.clone(), peer_name);
        Self {
            adapter,
            central,
            scanner,
            listener: None,
            state: ConnectionState::Disconnected,
            connection: None,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn BleListener>) {
        self.listener = Some(listener);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    /// 读取完成或会话已结束
    pub fn is_finished(&self) -> bool {
        self.state == ConnectionState::ReadComplete
    }

    fn listener(&self) -> Option<&dyn BleListener> {
        self.listener.as_deref()
    }

    fn report_failure(&self, failure: &SessionFailure) {
        if let Some(l) = self.listener() {
            l.on_session_failure(failure);
        }
    }

    /// 启动客户端
    ///
    /// 会话进行中再次调用返回 [`BleError::AlreadyActive`]。
    pub async fn start(&mut self) -> Result<(), BleError> {
        if self.state.is_active() {
            return Err(BleError::AlreadyActive("client"));
        }

        if !self.adapter.is_available().await {
            self.state = ConnectionState::Disconnected;
            if let Some(l) = self.listener() {
                l.on_error(ADAPTER_UNAVAILABLE);
            }
            return Ok(());
        }

        if !self.adapter.is_enabled().await {
            self.state = ConnectionState::AwaitingEnable;
            if let Some(l) = self.listener() {
                l.enable_bluetooth();
            }
            return Ok(());
        }

        if let Err(e) = self.scanner.start().await {
            warn!("Scan Failed: {}", e);
            self.state = ConnectionState::Disconnected;
            if let Some(l) = self.listener() {
                l.scan_result(false);
            }
            return Ok(());
        }

        self.state = ConnectionState::Scanning;
        info!("BLE Client started, looking for '{}'", self.scanner.peer_name());
        Ok(())
    }

    /// 开启蓝牙请求的结果
    ///
    /// 成功时从头执行启动流程；失败时回到初始状态，由上层决定如何结束。
    pub async fn on_enable_result(&mut self, enabled: bool) -> Result<(), BleError> {
        if self.state != ConnectionState::AwaitingEnable {
            debug!("Ignoring enable result in state {}", self.state);
            return Ok(());
        }
        if enabled {
            info!("Bluetooth enabled, restarting client");
            self.state = ConnectionState::Disconnected;
            self.start().await
        } else {
            warn!("Bluetooth enable request was denied");
            self.state = ConnectionState::Disconnected;
            Ok(())
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::ScanResult(record) => self.on_scan_result(&record).await,
            ClientEvent::BatchScanResults(records) => {
                debug!("onBatchScanResults: {} record(s)", records.len());
            }
            ClientEvent::ScanFailed { code } => self.on_scan_failed(code),
            ClientEvent::ConnectionStateChanged {
                handle,
                status,
                state,
            } => self.on_connection_state_change(&handle, status, state).await,
            ClientEvent::ServicesDiscovered { handle, status } => {
                self.on_services_discovered(&handle, status).await;
            }
            ClientEvent::CharacteristicRead {
                handle,
                characteristic,
                status,
                value,
            } => {
                self.on_characteristic_read(&handle, characteristic, status, &value)
                    .await;
            }
        }
    }

    async fn on_scan_result(&mut self, record: &AdvertisementRecord) {
        if self.state != ConnectionState::Scanning {
            return;
        }
        let Some(address) = self.scanner.take_match(record).await else {
            return;
        };
        self.connect_to_device(&address).await;
    }

    fn on_scan_failed(&mut self, code: i32) {
        if self.state != ConnectionState::Scanning {
            debug!("Ignoring scan failure {} in state {}", code, self.state);
            return;
        }
        warn!("Scan Failed: {}", code);
        self.scanner.mark_failed();
        self.state = ConnectionState::Disconnected;
        if let Some(l) = self.listener() {
            l.scan_result(false);
        }
    }

    async fn connect_to_device(&mut self, address: &str) {
        self.state = ConnectionState::Connecting;
        match self.central.connect(address).await {
            Ok(handle) => {
                info!("Connecting to device: {}", address);
                self.connection = Some(handle);
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", address, e);
                self.state = ConnectionState::Disconnected;
                self.report_failure(&SessionFailure::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// 事件是否属于当前连接
    fn is_current(&self, handle: &ConnectionHandle) -> bool {
        self.connection.as_ref() == Some(handle)
    }

    async fn on_connection_state_change(
        &mut self,
        handle: &ConnectionHandle,
        status: GattStatus,
        state: LinkState,
    ) {
        debug!("onConnectionStateChange: {:?} (status {})", state, status.code());
        if !self.is_current(handle) {
            debug!("Ignoring stale connection event for {}", handle);
            return;
        }

        match state {
            LinkState::Connected if self.state == ConnectionState::Connecting => {
                info!("Connected to server");
                self.state = ConnectionState::Connected;
                if let Some(l) = self.listener() {
                    l.scan_result(true);
                }
                self.discover_services(handle).await;
            }
            LinkState::Connected => {
                debug!("Duplicate connected event in state {}", self.state);
            }
            LinkState::Disconnected
                if self.state == ConnectionState::Connecting && !status.is_success() =>
            {
                warn!("Connection to {} failed (status {})", handle.address(), status.code());
                self.state = ConnectionState::Disconnected;
                self.release_connection().await;
                self.report_failure(&SessionFailure::ConnectFailed {
                    address: handle.address().to_string(),
                    reason: format!("GATT status {:#x}", status.code()),
                });
            }
            LinkState::Disconnected => {
                info!("Disconnected from server");
                if self.state.is_active() {
                    self.state = ConnectionState::Disconnected;
                    self.report_failure(&SessionFailure::ConnectionLost {
                        address: handle.address().to_string(),
                    });
                }
            }
        }
    }

    async fn discover_services(&mut self, handle: &ConnectionHandle) {
        self.state = ConnectionState::ServicesDiscovering;
        if let Err(e) = self.central.discover_services(handle).await {
            warn!("discoverServices failed: {}", e);
            self.state = ConnectionState::Connected;
            self.report_failure(&SessionFailure::DiscoveryFailed {
                status: GattStatus::Failure,
            });
        }
    }

    async fn on_services_discovered(&mut self, handle: &ConnectionHandle, status: GattStatus) {
        debug!("onServicesDiscovered status: {}", status.code());
        if !self.is_current(handle) || self.state != ConnectionState::ServicesDiscovering {
            debug!("Ignoring discovery result in state {}", self.state);
            return;
        }

        if status.is_success() {
            self.state = ConnectionState::ServicesDiscovered;
            self.request_data(handle).await;
        } else {
            self.state = ConnectionState::Connected;
            self.report_failure(&SessionFailure::DiscoveryFailed { status });
        }
    }

    async fn request_data(&mut self, handle: &ConnectionHandle) {
        match self
            .central
            .read_characteristic(handle, SERVICE_UUID, CHAR_UUID)
            .await
        {
            Ok(()) => self.state = ConnectionState::ReadInFlight,
            Err(e) => {
                warn!("readCharacteristic failed: {}", e);
                self.report_failure(&SessionFailure::ReadFailed {
                    status: GattStatus::Failure,
                });
            }
        }
    }

    async fn on_characteristic_read(
        &mut self,
        handle: &ConnectionHandle,
        characteristic: uuid::Uuid,
        status: GattStatus,
        value: &[u8],
    ) {
        debug!("onCharacteristicRead status: {}", status.code());
        if !self.is_current(handle)
            || self.state != ConnectionState::ReadInFlight
            || characteristic != CHAR_UUID
        {
            debug!("Ignoring read result in state {}", self.state);
            return;
        }

        if !status.is_success() {
            self.state = ConnectionState::ServicesDiscovered;
            self.report_failure(&SessionFailure::ReadFailed { status });
            return;
        }

        let data = decode_payload(value);
        info!("onCharacteristicRead: {}", data);
        self.state = ConnectionState::ReadComplete;
        if let Some(l) = self.listener() {
            l.on_success(&data);
        }
        self.release_connection().await;
    }

    async fn release_connection(&mut self) {
        if let Some(handle) = self.connection.take() {
            if let Err(e) = self.central.close(&handle).await {
                debug!("Ignoring close error for {}: {}", handle, e);
            }
        }
    }

    /// 停止客户端，任何状态下都可调用，不会失败
    pub async fn stop(&mut self) {
        self.scanner.stop().await;
        self.release_connection().await;
        if self.state != ConnectionState::ReadComplete {
            self.state = ConnectionState::Disconnected;
        }
    }
}
