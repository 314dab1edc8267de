//! 终端输出
//!
//! 把协议事件打印成人类可读的行，或在 `--json` 模式下每行一个 JSON 对象。

use blelink_core::{BleEvent, BleListener, LogLevel, SessionFailure};

pub struct ConsoleListener {
    json: bool,
}

impl ConsoleListener {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit_json(&self, event: &BleEvent) -> bool {
        if !self.json {
            return false;
        }
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("Failed to encode event: {}", e),
        }
        true
    }
}

impl BleListener for ConsoleListener {
    fn on_error(&self, message: &str) {
        if !self.emit_json(&BleEvent::Error(message.to_string())) {
            eprintln!("{} {message}", LogLevel::Error.icon());
        }
    }

    fn enable_bluetooth(&self) {
        if !self.emit_json(&BleEvent::EnableBluetooth) {
            println!("🔌 蓝牙未开启，正在请求开启...");
        }
    }

    fn on_success(&self, data: &str) {
        if !self.emit_json(&BleEvent::Success(data.to_string())) {
            println!("✅ 读取成功: {data}");
        }
    }

    fn scan_result(&self, connected: bool) {
        if self.emit_json(&BleEvent::ScanResult(connected)) {
            return;
        }
        if connected {
            println!("🔗 已连接到服务端");
        } else {
            eprintln!("{} 扫描失败", LogLevel::Error.icon());
        }
    }

    fn on_session_failure(&self, failure: &SessionFailure) {
        if !self.emit_json(&BleEvent::SessionFailure(failure.clone())) {
            eprintln!("{}  会话失败: {failure}", LogLevel::Warn.icon());
        }
    }
}
