//! 测试用的内存无线实现
//!
//! 每个 fake 记录收到的调用；`scripted` 模式下还会像真实后端一样把结果
//! 以事件形式投递回状态机。

#![allow(dead_code)]

use blelink_core::ble::ScanFilterSpec;
use blelink_core::{
    AdvertisementRecord, AdvertisementSpec, BleError, BleEvent, CentralRadio, ClientEvent,
    ConnectionHandle, GattServiceSpec, GattStatus, LinkState, PeripheralRadio, RadioAdapter,
    ReadRequest, ReadResponse, ServerEvent,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const SERVER_ADDRESS: &str = "AA:BB:CC:DD:EE:01";

/// 取出 channel 中已有的全部事件
pub fn drain(rx: &mut mpsc::Receiver<BleEvent>) -> Vec<BleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn advertisement(name: Option<&str>, address: &str) -> AdvertisementRecord {
    AdvertisementRecord::new(name.map(str::to_string), address)
        .with_services(vec![blelink_core::SERVICE_UUID])
}

// ============================================================================
// Adapter
// ============================================================================

pub struct FakeAdapter {
    available: AtomicBool,
    enabled: AtomicBool,
    grant_enable: AtomicBool,
    pub availability_checks: AtomicUsize,
    pub enable_requests: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(available: bool, enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(available),
            enabled: AtomicBool::new(enabled),
            grant_enable: AtomicBool::new(true),
            availability_checks: AtomicUsize::new(0),
            enable_requests: AtomicUsize::new(0),
        })
    }

    pub fn ready() -> Arc<Self> {
        Self::new(true, true)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn deny_enable(&self) {
        self.grant_enable.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl RadioAdapter for FakeAdapter {
    async fn is_available(&self) -> bool {
        self.availability_checks.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn request_enable(&self) -> Result<(), BleError> {
        self.enable_requests.fetch_add(1, Ordering::SeqCst);
        if self.grant_enable.load(Ordering::SeqCst) {
            self.enabled.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(BleError::Backend("user declined".to_string()))
        }
    }
}

// ============================================================================
// Central
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCall {
    StartScan(ScanFilterSpec),
    StopScan,
    Connect(String),
    Discover(ConnectionHandle),
    Read {
        handle: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    },
    Close(ConnectionHandle),
}

/// 客户端读请求转给服务端状态机的通道
pub struct ServerLink {
    pub requests: mpsc::Sender<ServerEvent>,
    pub responses: Arc<tokio::sync::Mutex<mpsc::Receiver<ReadResponse>>>,
}

#[derive(Default)]
pub struct FakeCentral {
    calls: Mutex<Vec<CentralCall>>,
    pub fail_scan: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_discover: AtomicBool,
    pub fail_read: AtomicBool,
    radio: Option<mpsc::Sender<ClientEvent>>,
    advertisements: Mutex<Vec<AdvertisementRecord>>,
    value: Mutex<Vec<u8>>,
    server: Option<Arc<ServerLink>>,
    next_request_id: AtomicU32,
}

impl FakeCentral {
    /// 只记录调用，事件由测试手动投递
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 扫描时报告 `advertisements`，连接、发现和读取都立即成功
    pub fn scripted(
        radio: mpsc::Sender<ClientEvent>,
        advertisements: Vec<AdvertisementRecord>,
        value: &[u8],
    ) -> Arc<Self> {
        Arc::new(Self {
            radio: Some(radio),
            advertisements: Mutex::new(advertisements),
            value: Mutex::new(value.to_vec()),
            ..Self::default()
        })
    }

    /// 读取转发给服务端，由服务端状态机作答
    pub fn linked(
        radio: mpsc::Sender<ClientEvent>,
        advertisements: Vec<AdvertisementRecord>,
        server: ServerLink,
    ) -> Arc<Self> {
        Arc::new(Self {
            radio: Some(radio),
            advertisements: Mutex::new(advertisements),
            server: Some(Arc::new(server)),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<CentralCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&CentralCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: CentralCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn post(&self, event: ClientEvent) {
        if let Some(radio) = &self.radio {
            let _ = radio.send(event).await;
        }
    }
}

#[async_trait::async_trait]
impl CentralRadio for FakeCentral {
    async fn start_scan(&self, filter: &ScanFilterSpec) -> Result<(), BleError> {
        self.record(CentralCall::StartScan(*filter));
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(BleError::Backend("scan refused".to_string()));
        }
        let records = self.advertisements.lock().unwrap().clone();
        for record in records {
            self.post(ClientEvent::ScanResult(record)).await;
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        self.record(CentralCall::StopScan);
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<ConnectionHandle, BleError> {
        self.record(CentralCall::Connect(address.to_string()));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BleError::DeviceNotFound(address.to_string()));
        }
        let handle = ConnectionHandle::new(address);
        self.post(ClientEvent::ConnectionStateChanged {
            handle: handle.clone(),
            status: GattStatus::Success,
            state: LinkState::Connected,
        })
        .await;
        Ok(handle)
    }

    async fn discover_services(&self, handle: &ConnectionHandle) -> Result<(), BleError> {
        self.record(CentralCall::Discover(handle.clone()));
        if self.fail_discover.load(Ordering::SeqCst) {
            return Err(BleError::Backend("discovery refused".to_string()));
        }
        self.post(ClientEvent::ServicesDiscovered {
            handle: handle.clone(),
            status: GattStatus::Success,
        })
        .await;
        Ok(())
    }

    async fn read_characteristic(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), BleError> {
        self.record(CentralCall::Read {
            handle: handle.clone(),
            service,
            characteristic,
        });
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(BleError::CharacteristicNotFound(characteristic));
        }

        let (Some(radio), Some(server)) = (self.radio.clone(), self.server.clone()) else {
            let value = self.value.lock().unwrap().clone();
            self.post(ClientEvent::CharacteristicRead {
                handle: handle.clone(),
                characteristic,
                status: GattStatus::Success,
                value,
            })
            .await;
            return Ok(());
        };

        let request = ReadRequest {
            device: "client".to_string(),
            request_id: self.next_request_id.fetch_add(1, Ordering::SeqCst),
            offset: 0,
            characteristic,
        };
        let handle = handle.clone();
        tokio::spawn(async move {
            if server
                .requests
                .send(ServerEvent::ReadRequest(request))
                .await
                .is_err()
            {
                return;
            }
            let Some(response) = server.responses.lock().await.recv().await else {
                return;
            };
            let _ = radio
                .send(ClientEvent::CharacteristicRead {
                    handle,
                    characteristic,
                    status: response.status,
                    value: response.value,
                })
                .await;
        });
        Ok(())
    }

    async fn close(&self, handle: &ConnectionHandle) -> Result<(), BleError> {
        self.record(CentralCall::Close(handle.clone()));
        Ok(())
    }
}

// ============================================================================
// Peripheral
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralCall {
    SetLocalName(String),
    StartAdvertising(AdvertisementSpec),
    StopAdvertising,
    OpenGattServer(GattServiceSpec),
    SendResponse(ReadResponse),
    CloseGattServer,
}

#[derive(Default)]
pub struct FakePeripheral {
    calls: Mutex<Vec<PeripheralCall>>,
    pub fail_advertise: AtomicBool,
    pub fail_open: AtomicBool,
    responses: Option<mpsc::Sender<ReadResponse>>,
}

impl FakePeripheral {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 每个响应同时发送到 `responses`
    pub fn forwarding(responses: mpsc::Sender<ReadResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Some(responses),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<PeripheralCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn responses(&self) -> Vec<ReadResponse> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                PeripheralCall::SendResponse(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&PeripheralCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: PeripheralCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl PeripheralRadio for FakePeripheral {
    async fn set_local_name(&self, name: &str) -> Result<(), BleError> {
        self.record(PeripheralCall::SetLocalName(name.to_string()));
        Ok(())
    }

    async fn start_advertising(&self, spec: &AdvertisementSpec) -> Result<(), BleError> {
        self.record(PeripheralCall::StartAdvertising(spec.clone()));
        if self.fail_advertise.load(Ordering::SeqCst) {
            return Err(BleError::Backend("advertising not supported".to_string()));
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), BleError> {
        self.record(PeripheralCall::StopAdvertising);
        Ok(())
    }

    async fn open_gatt_server(&self, service: &GattServiceSpec) -> Result<(), BleError> {
        self.record(PeripheralCall::OpenGattServer(service.clone()));
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(BleError::Backend("gatt server unavailable".to_string()));
        }
        Ok(())
    }

    async fn send_response(&self, response: ReadResponse) -> Result<(), BleError> {
        self.record(PeripheralCall::SendResponse(response.clone()));
        if let Some(tx) = &self.responses {
            let _ = tx.send(response).await;
        }
        Ok(())
    }

    async fn close_gatt_server(&self) -> Result<(), BleError> {
        self.record(PeripheralCall::CloseGattServer);
        Ok(())
    }
}
