//! 客户端无线原语
//!
//! [`CentralRadio`] 的方法只负责发起操作，结果以 [`ClientEvent`] 的形式
//! 投递到客户端状态机的收件箱，与平台回调的时序一致。
//!
//! [`BtleplugCentral`] 是基于 btleplug 的实现。

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures_util::StreamExt;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::ble::gatt::GattStatus;
use crate::ble::{AdvertisementRecord, ConnectionHandle, LinkState, ScanFilterSpec};
use crate::error::BleError;

/// 客户端收到的无线事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ScanResult(AdvertisementRecord),
    BatchScanResults(Vec<AdvertisementRecord>),
    ScanFailed {
        code: i32,
    },
    ConnectionStateChanged {
        handle: ConnectionHandle,
        status: GattStatus,
        state: LinkState,
    },
    ServicesDiscovered {
        handle: ConnectionHandle,
        status: GattStatus,
    },
    CharacteristicRead {
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    },
}

#[async_trait::async_trait]
pub trait CentralRadio: Send + Sync {
    async fn start_scan(&self, filter: &ScanFilterSpec) -> Result<(), BleError>;
    async fn stop_scan(&self) -> Result<(), BleError>;
    /// 发起连接，连接结果以 `ConnectionStateChanged` 投递
    async fn connect(&self, address: &str) -> Result<ConnectionHandle, BleError>;
    async fn discover_services(&self, handle: &ConnectionHandle) -> Result<(), BleError>;
    async fn read_characteristic(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), BleError>;
    async fn close(&self, handle: &ConnectionHandle) -> Result<(), BleError>;
}

struct Link {
    peripheral: Peripheral,
    watcher: JoinHandle<()>,
}

/// btleplug 实现
pub struct BtleplugCentral {
    adapter: Option<Adapter>,
    events: mpsc::Sender<ClientEvent>,
    scan_pump: Mutex<Option<JoinHandle<()>>>,
    links: Mutex<HashMap<u64, Link>>,
}

impl BtleplugCentral {
    /// 没有适配器时也能创建，由 [`RadioAdapter`](crate::ble::adapter::RadioAdapter) 负责上报
    pub async fn new(events: mpsc::Sender<ClientEvent>) -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next();

        Ok(Self {
            adapter,
            events,
            scan_pump: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
        })
    }

    fn adapter(&self) -> Result<&Adapter, BleError> {
        self.adapter.as_ref().ok_or(BleError::NoAdapter)
    }

    async fn find_device(&self, address: &str) -> Result<Peripheral, BleError> {
        let peripherals = self.adapter()?.peripherals().await?;

        for peripheral in peripherals {
            if let Some(props) = peripheral.properties().await? {
                if props.address.to_string().eq_ignore_ascii_case(address) {
                    return Ok(peripheral);
                }
            }
        }

        Err(BleError::DeviceNotFound(address.to_string()))
    }

    async fn peripheral(&self, handle: &ConnectionHandle) -> Result<Peripheral, BleError> {
        self.links
            .lock()
            .await
            .get(&handle.id())
            .map(|link| link.peripheral.clone())
            .ok_or(BleError::UnknownConnection(handle.id()))
    }
}

#[async_trait::async_trait]
impl CentralRadio for BtleplugCentral {
    async fn start_scan(&self, filter: &ScanFilterSpec) -> Result<(), BleError> {
        let adapter = self.adapter()?;
        let stream = adapter.events().await?;
        adapter
            .start_scan(ScanFilter {
                services: vec![filter.service],
            })
            .await?;

        let pump = tokio::spawn(pump_scan_results(
            adapter.clone(),
            stream,
            self.events.clone(),
        ));
        if let Some(old) = self.scan_pump.lock().await.replace(pump) {
            old.abort();
        }
        debug!("Scan started with service filter {}", filter.service);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        if let Some(pump) = self.scan_pump.lock().await.take() {
            pump.abort();
        }
        self.adapter()?.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<ConnectionHandle, BleError> {
        let peripheral = self.find_device(address).await?;
        let handle = ConnectionHandle::new(address);

        // 先订阅事件再连接，避免漏掉断开通知
        let stream = self.adapter()?.events().await?;
        let watcher = tokio::spawn(connect_and_watch(
            peripheral.clone(),
            handle.clone(),
            stream,
            self.events.clone(),
        ));

        self.links
            .lock()
            .await
            .insert(handle.id(), Link { peripheral, watcher });
        Ok(handle)
    }

    async fn discover_services(&self, handle: &ConnectionHandle) -> Result<(), BleError> {
        let peripheral = self.peripheral(handle).await?;
        let handle = handle.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let status = match peripheral.discover_services().await {
                Ok(()) => GattStatus::Success,
                Err(e) => {
                    warn!("discover_services on {} failed: {}", handle, e);
                    GattStatus::Failure
                }
            };
            let _ = events
                .send(ClientEvent::ServicesDiscovered { handle, status })
                .await;
        });
        Ok(())
    }

    async fn read_characteristic(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), BleError> {
        let peripheral = self.peripheral(handle).await?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or(BleError::CharacteristicNotFound(characteristic))?;

        let handle = handle.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let (status, value) = match peripheral.read(&target).await {
                Ok(value) => (GattStatus::Success, value),
                Err(e) => {
                    warn!("read {} on {} failed: {}", characteristic, handle, e);
                    (GattStatus::Failure, Vec::new())
                }
            };
            let _ = events
                .send(ClientEvent::CharacteristicRead {
                    handle,
                    characteristic,
                    status,
                    value,
                })
                .await;
        });
        Ok(())
    }

    async fn close(&self, handle: &ConnectionHandle) -> Result<(), BleError> {
        let link = self
            .links
            .lock()
            .await
            .remove(&handle.id())
            .ok_or(BleError::UnknownConnection(handle.id()))?;
        link.watcher.abort();
        link.peripheral.disconnect().await?;
        debug!("Closed connection {}", handle);
        Ok(())
    }
}

impl Drop for BtleplugCentral {
    fn drop(&mut self) {
        if let Some(pump) = self.scan_pump.get_mut().take() {
            pump.abort();
        }
        for (_, link) in self.links.get_mut().drain() {
            link.watcher.abort();
        }
    }
}

type EventStream = std::pin::Pin<Box<dyn futures_util::Stream<Item = CentralEvent> + Send>>;

async fn pump_scan_results(
    adapter: Adapter,
    mut stream: EventStream,
    events: mpsc::Sender<ClientEvent>,
) {
    while let Some(event) = stream.next().await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServicesAdvertisement { id, .. } => id,
            _ => continue,
        };
        match advertisement_record(&adapter, &id).await {
            Ok(Some(record)) => {
                if events.send(ClientEvent::ScanResult(record)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => trace!("Skipping {:?}: {}", id, e),
        }
    }

    // 事件流意外结束，视为扫描失败
    warn!("Adapter event stream ended while scanning");
    let _ = events.send(ClientEvent::ScanFailed { code: -1 }).await;
}

async fn advertisement_record(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<Option<AdvertisementRecord>, BleError> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };
    Ok(Some(
        AdvertisementRecord::new(props.local_name, props.address.to_string())
            .with_services(props.services),
    ))
}

async fn connect_and_watch(
    peripheral: Peripheral,
    handle: ConnectionHandle,
    mut stream: EventStream,
    events: mpsc::Sender<ClientEvent>,
) {
    info!("Connecting to device: {}", handle.address());
    let (status, state) = match peripheral.connect().await {
        Ok(()) => (GattStatus::Success, LinkState::Connected),
        Err(e) => {
            warn!("Connection to {} failed: {}", handle.address(), e);
            (GattStatus::Failure, LinkState::Disconnected)
        }
    };
    let connected = state == LinkState::Connected;
    let _ = events
        .send(ClientEvent::ConnectionStateChanged {
            handle: handle.clone(),
            status,
            state,
        })
        .await;
    if !connected {
        return;
    }

    let id = peripheral.id();
    while let Some(event) = stream.next().await {
        if let CentralEvent::DeviceDisconnected(gone) = event {
            if gone == id {
                let _ = events
                    .send(ClientEvent::ConnectionStateChanged {
                        handle,
                        status: GattStatus::Success,
                        state: LinkState::Disconnected,
                    })
                    .await;
                return;
            }
        }
    }
}
