//! BLE 协议核心
//!
//! - **adapter**: 蓝牙适配器能力（是否存在、是否开启、请求开启）
//! - **listener**: 协议层到 UI 的事件回调接口
//! - **central** / **peripheral**: 平台无线原语（btleplug / bluer 实现）
//! - **scanner** / **advertiser**: 扫描与广播
//! - **client** / **server**: 连接、服务发现和特征读取状态机

pub mod adapter;
pub mod advertiser;
pub mod central;
pub mod client;
pub mod gatt;
pub mod listener;
pub mod peripheral;
pub mod scanner;
pub mod server;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// 服务 UUID（借用 Heart Rate Service 的分配值，仅作为标识符使用）
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
/// 特征 UUID
pub const CHAR_UUID: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// 服务端广播的设备名称，客户端据此匹配
pub const PEER_NAME: &str = "MyAdapter";

/// 服务端特征的默认内容
pub const DEFAULT_PAYLOAD: &str = "Hello from Server";

/// 适配器不存在时上报给监听器的错误信息
pub const ADAPTER_UNAVAILABLE: &str = "Bluetooth is not available";

/// 扫描过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilterSpec {
    pub service: Uuid,
}

impl Default for ScanFilterSpec {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
        }
    }
}

/// 一次扫描回调中观察到的广播
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementRecord {
    pub device_name: Option<String>,
    pub device_address: String,
    pub service_uuids: Vec<Uuid>,
}

impl AdvertisementRecord {
    pub fn new(device_name: Option<String>, device_address: impl Into<String>) -> Self {
        Self {
            device_name,
            device_address: device_address.into(),
            service_uuids: Vec::new(),
        }
    }

    pub fn with_services(mut self, services: Vec<Uuid>) -> Self {
        self.service_uuids = services;
        self
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 客户端持有的一条 GATT 连接
///
/// id 在进程内唯一，用来识别来自旧连接的过期回调。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    id: u64,
    address: String,
}

impl ConnectionHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            address: address.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.id)
    }
}

/// 链路层连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Connected,
    Disconnected,
}
