//! 事件监听接口
//!
//! 客户端和服务端通过 [`BleListener`] 通知上层（CLI、UI），协议逻辑不依赖任何界面。

use serde::Serialize;
use tokio::sync::mpsc;

use crate::ble::gatt::GattStatus;

/// 连接建立之后的失败
///
/// 状态机在这些失败后会停在原地，不重试；
/// 通过 [`BleListener::on_session_failure`] 可选地通知上层。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionFailure {
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("connection to {address} lost")]
    ConnectionLost { address: String },

    #[error("service discovery failed (status {status:?})")]
    DiscoveryFailed { status: GattStatus },

    #[error("characteristic read failed (status {status:?})")]
    ReadFailed { status: GattStatus },
}

/// 协议事件回调
pub trait BleListener: Send + Sync {
    /// 致命错误，调用方应结束会话
    fn on_error(&self, message: &str);
    /// 蓝牙未开启，调用方需要发起开启请求，结果通过 `on_enable_result` 告知
    fn enable_bluetooth(&self);
    /// 读取到的特征值（仅客户端）
    fn on_success(&self, data: &str);
    /// 连接成功 (`true`) 或扫描失败 (`false`)（仅客户端）
    fn scan_result(&self, _connected: bool) {}
    /// 连接后的失败（仅客户端）
    fn on_session_failure(&self, _failure: &SessionFailure) {}
}

/// 监听器事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BleEvent {
    Error(String),
    EnableBluetooth,
    Success(String),
    ScanResult(bool),
    SessionFailure(SessionFailure),
}

/// 把回调转为 channel 消息的监听器
pub struct ChannelListener {
    tx: mpsc::Sender<BleEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::Receiver<BleEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { tx }, rx)
    }
}

impl BleListener for ChannelListener {
    fn on_error(&self, message: &str) {
        let _ = self.tx.try_send(BleEvent::Error(message.to_string()));
    }

    fn enable_bluetooth(&self) {
        let _ = self.tx.try_send(BleEvent::EnableBluetooth);
    }

    fn on_success(&self, data: &str) {
        let _ = self.tx.try_send(BleEvent::Success(data.to_string()));
    }

    fn scan_result(&self, connected: bool) {
        let _ = self.tx.try_send(BleEvent::ScanResult(connected));
    }

    fn on_session_failure(&self, failure: &SessionFailure) {
        let _ = self.tx.try_send(BleEvent::SessionFailure(failure.clone()));
    }
}

impl BleEvent {
    /// 把事件转发给另一个监听器
    pub fn dispatch(&self, listener: &dyn BleListener) {
        match self {
            BleEvent::Error(message) => listener.on_error(message),
            BleEvent::EnableBluetooth => listener.enable_bluetooth(),
            BleEvent::Success(data) => listener.on_success(data),
            BleEvent::ScanResult(connected) => listener.scan_result(*connected),
            BleEvent::SessionFailure(failure) => listener.on_session_failure(failure),
        }
    }
}
