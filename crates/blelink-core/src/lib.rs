//! BleLink Core Library
//!
//! 双角色 BLE 演示的核心实现库：服务端广播一个服务并提供一个可读特征，
//! 客户端扫描、连接、发现服务并读取该特征。
//!
//! # 模块
//!
//! - **ble**: 适配器、扫描、广播、客户端/服务端状态机
//! - **workflow**: 把状态机和真实后端连起来的事件循环
//! - **config**: 持久化设置
//! - **logging**: 日志级别
//!
//! # 使用示例
//!
//! ## 读取服务端数据
//!
//! ```ignore
//! use blelink_core::{AppSettings, ClientOptions, ClientWorkflow};
//!
//! let settings = AppSettings::load();
//! let workflow = ClientWorkflow::new(ClientOptions::from(&settings));
//! let data = workflow.run(&ui, tokio::signal::ctrl_c().map(|_| ())).await?;
//! println!("{data}");
//! ```
//!
//! ## 运行服务端
//!
//! ```ignore
//! use blelink_core::{ServerOptions, ServerWorkflow};
//!
//! let (updates_tx, updates_rx) = tokio::sync::mpsc::channel(8);
//! let workflow = ServerWorkflow::new(ServerOptions::default());
//! workflow.run(&ui, updates_rx, shutdown).await?;
//! ```

pub mod ble;
pub mod config;
pub mod error;
pub mod logging;
pub mod workflow;

// BLE re-exports
pub use ble::adapter::{BluerAdapter, RadioAdapter};
pub use ble::central::{BtleplugCentral, CentralRadio, ClientEvent};
pub use ble::client::{BleClient, ConnectionState};
pub use ble::gatt::{GattServiceSpec, GattStatus, ReadRequest, ReadResponse};
pub use ble::listener::{BleEvent, BleListener, ChannelListener, SessionFailure};
pub use ble::peripheral::{AdvertisementSpec, BluerPeripheral, PeripheralRadio, ServerEvent};
pub use ble::server::{BleServer, ServerState, SharedPayload};
pub use ble::{
    AdvertisementRecord, CHAR_UUID, ConnectionHandle, DEFAULT_PAYLOAD, LinkState, PEER_NAME,
    SERVICE_UUID,
};

pub use config::AppSettings;
pub use error::BleError;
pub use logging::LogLevel;

// Workflow re-exports
pub use workflow::{ClientOptions, ClientWorkflow, ServerOptions, ServerWorkflow};
