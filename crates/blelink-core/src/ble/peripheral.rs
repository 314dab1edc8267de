//! 服务端无线原语
//!
//! [`PeripheralRadio`] 对应平台的广播和 GATT Server 接口。读请求以
//! [`ServerEvent::ReadRequest`] 投递给服务端状态机，状态机通过
//! [`PeripheralRadio::send_response`] 作答；不作答的请求由对端超时。
//!
//! [`BluerPeripheral`] 是基于 BlueZ (bluer) 的实现。

use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest, ReqError, Service,
};
use bluer::{AdapterEvent, Address, DeviceEvent, DeviceProperty};
use futures_util::{FutureExt, StreamExt};
use log::{debug, info, trace, warn};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::ble::LinkState;
use crate::ble::gatt::{CharacteristicSpec, GattServiceSpec, GattStatus, ReadRequest, ReadResponse};
use crate::error::BleError;

/// BlueZ 等待状态机作答的上限，超时后向对端返回失败
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// 服务端收到的无线事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ConnectionStateChanged { device: String, state: LinkState },
    ReadRequest(ReadRequest),
}

/// 广播模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvertiseMode {
    #[default]
    LowLatency,
    Balanced,
    LowPower,
}

/// 广播参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementSpec {
    pub local_name: String,
    pub service_uuids: Vec<Uuid>,
    pub include_name: bool,
    pub connectable: bool,
    pub mode: AdvertiseMode,
}

#[async_trait::async_trait]
pub trait PeripheralRadio: Send + Sync {
    async fn set_local_name(&self, name: &str) -> Result<(), BleError>;
    async fn start_advertising(&self, spec: &AdvertisementSpec) -> Result<(), BleError>;
    async fn stop_advertising(&self) -> Result<(), BleError>;
    async fn open_gatt_server(&self, service: &GattServiceSpec) -> Result<(), BleError>;
    async fn send_response(&self, response: ReadResponse) -> Result<(), BleError>;
    async fn close_gatt_server(&self) -> Result<(), BleError>;
}

type PendingReads = Arc<Mutex<HashMap<u32, oneshot::Sender<ReadResponse>>>>;

/// bluer 实现
pub struct BluerPeripheral {
    adapter: Option<bluer::Adapter>,
    events: mpsc::Sender<ServerEvent>,
    advertisement: Mutex<Option<AdvertisementHandle>>,
    application: Mutex<Option<ApplicationHandle>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    subscribers: Arc<Mutex<Vec<CharacteristicNotifier>>>,
    pending: PendingReads,
    next_request_id: Arc<AtomicU32>,
}

impl BluerPeripheral {
    /// `adapter` 为空时所有操作返回 [`BleError::NoAdapter`]
    pub fn new(adapter: Option<bluer::Adapter>, events: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            adapter,
            events,
            advertisement: Mutex::new(None),
            application: Mutex::new(None),
            watcher: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU32::new(1)),
        }
    }

    fn adapter(&self) -> Result<&bluer::Adapter, BleError> {
        self.adapter.as_ref().ok_or(BleError::NoAdapter)
    }

    fn characteristic(&self, spec: &CharacteristicSpec) -> Characteristic {
        let uuid = spec.uuid;

        let read = spec.read.then(|| {
            let pending = self.pending.clone();
            let ids = self.next_request_id.clone();
            let events = self.events.clone();
            CharacteristicRead {
                read: spec.read_permission,
                fun: Box::new(move |req: CharacteristicReadRequest| {
                    forward_read(uuid, req, pending.clone(), ids.clone(), events.clone()).boxed()
                }),
                ..Default::default()
            }
        });

        let notify = spec.notify.then(|| {
            let subscribers = self.subscribers.clone();
            CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let subscribers = subscribers.clone();
                    async move {
                        let mut subscribers = subscribers.lock().await;
                        let total = add_subscriber(
                            &mut subscribers,
                            notifier,
                            CharacteristicNotifier::is_stopped,
                        );
                        debug!("Notification subscriber added for {}, total={}", uuid, total);
                    }
                    .boxed()
                })),
                ..Default::default()
            }
        });

        Characteristic {
            uuid,
            read,
            notify,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl PeripheralRadio for BluerPeripheral {
    async fn set_local_name(&self, name: &str) -> Result<(), BleError> {
        self.adapter()?.set_alias(name.to_string()).await?;
        info!("Bluetooth name set to: {}", name);
        Ok(())
    }

    async fn start_advertising(&self, spec: &AdvertisementSpec) -> Result<(), BleError> {
        // BlueZ 不区分广播模式，间隔交给 bluetoothd 默认值
        let advertisement_type = if spec.connectable {
            bluer::adv::Type::Peripheral
        } else {
            bluer::adv::Type::Broadcast
        };
        let adv = Advertisement {
            advertisement_type,
            service_uuids: spec.service_uuids.iter().copied().collect::<BTreeSet<_>>(),
            local_name: spec.include_name.then(|| spec.local_name.clone()),
            discoverable: Some(true),
            ..Default::default()
        };

        debug!(
            "Starting BLE advertisement: service_uuids={:?}, local_name={}, mode={:?}",
            spec.service_uuids, spec.local_name, spec.mode
        );
        let handle = self.adapter()?.advertise(adv).await?;
        *self.advertisement.lock().await = Some(handle);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), BleError> {
        // AdvertisementHandle drop 时注销广播
        if self.advertisement.lock().await.take().is_some() {
            debug!("BLE advertisement stopped");
        }
        Ok(())
    }

    async fn open_gatt_server(&self, service: &GattServiceSpec) -> Result<(), BleError> {
        let app = Application {
            services: vec![Service {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| self.characteristic(c))
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        };

        debug!("Registering GATT application with service_uuid={}", service.uuid);
        let adapter = self.adapter()?;
        let handle = adapter.serve_gatt_application(app).await?;
        *self.application.lock().await = Some(handle);

        let watcher = tokio::spawn(watch_connections(adapter.clone(), self.events.clone()));
        if let Some(old) = self.watcher.lock().await.replace(watcher) {
            old.abort();
        }
        Ok(())
    }

    async fn send_response(&self, response: ReadResponse) -> Result<(), BleError> {
        let tx = self
            .pending
            .lock()
            .await
            .remove(&response.request_id)
            .ok_or_else(|| {
                BleError::Backend(format!("no pending read request {}", response.request_id))
            })?;
        // 请求方可能已超时
        let _ = tx.send(response);
        Ok(())
    }

    async fn close_gatt_server(&self) -> Result<(), BleError> {
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }
        self.subscribers.lock().await.clear();
        self.pending.lock().await.clear();
        if self.application.lock().await.take().is_some() {
            debug!("GATT application unregistered");
        }
        Ok(())
    }
}

impl Drop for BluerPeripheral {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

async fn forward_read(
    characteristic: Uuid,
    req: CharacteristicReadRequest,
    pending: PendingReads,
    ids: Arc<AtomicU32>,
    events: mpsc::Sender<ServerEvent>,
) -> Result<Vec<u8>, ReqError> {
    let request_id = ids.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    pending.lock().await.insert(request_id, tx);

    let request = ReadRequest {
        device: req.device_address.to_string(),
        request_id,
        offset: usize::from(req.offset),
        characteristic,
    };
    if events.send(ServerEvent::ReadRequest(request)).await.is_err() {
        pending.lock().await.remove(&request_id);
        return Err(ReqError::Failed);
    }

    match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
        Ok(Ok(response)) => match response.status {
            GattStatus::Success => Ok(response.value),
            GattStatus::InvalidOffset => Err(ReqError::InvalidOffset),
            GattStatus::ReadNotPermitted => Err(ReqError::NotPermitted),
            GattStatus::RequestNotSupported => Err(ReqError::NotSupported),
            GattStatus::Failure => Err(ReqError::Failed),
        },
        _ => {
            pending.lock().await.remove(&request_id);
            debug!("Read request {} got no response", request_id);
            Err(ReqError::Failed)
        }
    }
}

/// 登记新订阅，同时丢掉已经停止的
fn add_subscriber<N>(
    subscribers: &mut Vec<N>,
    notifier: N,
    is_stopped: impl Fn(&N) -> bool,
) -> usize {
    subscribers.retain(|n| !is_stopped(n));
    subscribers.push(notifier);
    subscribers.len()
}

/// 每个设备一个连接监视任务，随本结构一起取消
struct DeviceWatchers<K> {
    tasks: HashMap<K, JoinHandle<()>>,
}

impl<K: Eq + Hash> DeviceWatchers<K> {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// 该设备已有运行中的任务时不再启动，返回 `false`
    fn watch<F>(&mut self, key: K, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tasks.get(&key).is_some_and(|t| !t.is_finished()) {
            return false;
        }
        self.tasks.insert(key, tokio::spawn(task));
        true
    }

    fn forget(&mut self, key: &K) {
        if let Some(task) = self.tasks.remove(key) {
            task.abort();
        }
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl<K> Drop for DeviceWatchers<K> {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

async fn watch_connections(adapter: bluer::Adapter, events: mpsc::Sender<ServerEvent>) {
    let mut adapter_events = match adapter.events().await {
        Ok(stream) => Box::pin(stream),
        Err(e) => {
            warn!("Cannot watch adapter events: {}", e);
            return;
        }
    };

    let mut watchers = DeviceWatchers::new();

    // 事件流只报告新出现的设备，BlueZ 已知的设备（如回连的客户端）要先登记
    match adapter.device_addresses().await {
        Ok(addrs) => {
            for addr in addrs {
                watch_address(&adapter, &mut watchers, addr, &events);
            }
            debug!("Watching {} known device(s)", watchers.len());
        }
        Err(e) => warn!("Cannot list known devices: {}", e),
    }

    while let Some(event) = adapter_events.next().await {
        match event {
            AdapterEvent::DeviceAdded(addr) => {
                watch_address(&adapter, &mut watchers, addr, &events);
            }
            AdapterEvent::DeviceRemoved(addr) => watchers.forget(&addr),
            _ => {}
        }
    }
}

fn watch_address(
    adapter: &bluer::Adapter,
    watchers: &mut DeviceWatchers<Address>,
    addr: Address,
    events: &mpsc::Sender<ServerEvent>,
) {
    match adapter.device(addr) {
        Ok(device) => {
            watchers.watch(addr, watch_device(device, events.clone()));
        }
        Err(e) => trace!("Skipping device {}: {}", addr, e),
    }
}

async fn watch_device(device: bluer::Device, events: mpsc::Sender<ServerEvent>) {
    let Ok(stream) = device.events().await else {
        return;
    };
    let mut stream = Box::pin(stream);
    while let Some(DeviceEvent::PropertyChanged(property)) = stream.next().await {
        if let DeviceProperty::Connected(connected) = property {
            let state = if connected {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            };
            let event = ServerEvent::ConnectionStateChanged {
                device: device.address().to_string(),
                state,
            };
            if events.send(event).await.is_err() {
                return;
            }
        }
    }
}
