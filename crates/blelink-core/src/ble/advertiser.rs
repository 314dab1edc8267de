use log::{debug, info, warn};
use std::sync::Arc;

use crate::ble::SERVICE_UUID;
use crate::ble::peripheral::{AdvertiseMode, AdvertisementSpec, PeripheralRadio};

/// 服务端广播
///
/// 广播失败不影响 GATT Server，只记录日志。
pub struct BleAdvertiser {
    peripheral: Arc<dyn PeripheralRadio>,
    local_name: String,
    active: bool,
}

impl BleAdvertiser {
    pub fn new(peripheral: Arc<dyn PeripheralRadio>, local_name: impl Into<String>) -> Self {
        Self {
            peripheral,
            local_name: local_name.into(),
            active: false,
        }
    }

    pub fn spec(&self) -> AdvertisementSpec {
        AdvertisementSpec {
            local_name: self.local_name.clone(),
            service_uuids: vec![SERVICE_UUID],
            include_name: true,
            connectable: true,
            mode: AdvertiseMode::LowLatency,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 设置适配器名称并开始广播
    pub async fn start(&mut self) {
        if let Err(e) = self.peripheral.set_local_name(&self.local_name).await {
            warn!("Failed to set adapter name to '{}': {}", self.local_name, e);
        }

        match self.peripheral.start_advertising(&self.spec()).await {
            Ok(()) => {
                self.active = true;
                info!("Advertising started successfully");
            }
            Err(e) => warn!("Advertising failed with error: {}", e),
        }
    }

    pub async fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.peripheral.stop_advertising().await {
            debug!("Ignoring stop_advertising error: {}", e);
        }
    }
}
