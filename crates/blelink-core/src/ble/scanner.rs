//! BLE Scanner - 发现服务端
//!
//! 扫描分两层过滤：
//! - 无线层按服务 UUID 过滤，减少无关广播
//! - 应用层再按设备名称匹配，因为其他设备也可能广播同一个通用服务 UUID
//!
//! 匹配成功后扫描只停止一次，之后到达的匹配广播全部忽略。

use log::{debug, info, trace, warn};
use std::sync::Arc;

use crate::ble::central::CentralRadio;
use crate::ble::{AdvertisementRecord, ScanFilterSpec};
use crate::error::BleError;

pub struct Scanner {
    central: Arc<dyn CentralRadio>,
    filter: ScanFilterSpec,
    peer_name: String,
    active: bool,
}

impl Scanner {
    pub fn new(central: Arc<dyn CentralRadio>, peer_name: impl Into<String>) -> Self {
        Self {
            central,
            filter: ScanFilterSpec::default(),
            peer_name: peer_name.into(),
            active: false,
        }
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub async fn start(&mut self) -> Result<(), BleError> {
        self.central.start_scan(&self.filter).await?;
        self.active = true;
        info!(
            "Scanning for '{}' advertising {}",
            self.peer_name, self.filter.service
        );
        Ok(())
    }

    /// 广播的设备名称是否为期望的对端名称
    pub fn is_match(&self, record: &AdvertisementRecord) -> bool {
        record.device_name.as_deref() == Some(self.peer_name.as_str())
    }

    /// 处理一条扫描结果
    ///
    /// 扫描仍在进行且名称匹配时停止扫描并返回设备地址。
    pub async fn take_match(&mut self, record: &AdvertisementRecord) -> Option<String> {
        trace!("onScanResult: {:?}", record);
        if !self.active || !self.is_match(record) {
            return None;
        }
        info!("Found device: {}", record.device_address);
        self.stop().await;
        Some(record.device_address.clone())
    }

    /// 扫描失败后底层已不在扫描
    pub fn mark_failed(&mut self) {
        self.active = false;
    }

    /// 停止扫描，可重复调用，错误只记录
    pub async fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        match self.central.stop_scan().await {
            Ok(()) => debug!("Scan stopped"),
            Err(e) => warn!("Failed to stop scan: {}", e),
        }
    }
}
