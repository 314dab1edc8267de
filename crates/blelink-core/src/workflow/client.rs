//! 客户端工作流
//!
//! 高层 API 封装完整的读取流程:
//! 1. 打开适配器和 btleplug 后端
//! 2. 启动 [`BleClient`]，需要时请求开启蓝牙
//! 3. 把无线事件逐条交给状态机，直到读到数据、失败、超时或被中断

use anyhow::anyhow;
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::ble::adapter::{BluerAdapter, RadioAdapter};
use crate::ble::central::{BtleplugCentral, ClientEvent};
use crate::ble::client::BleClient;
use crate::ble::listener::{BleEvent, BleListener, ChannelListener};
use crate::config::AppSettings;

/// 客户端选项
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// 适配器名称，为空时使用默认适配器
    pub adapter: Option<String>,
    /// 要匹配的服务端名称
    pub peer_name: String,
    /// 整体超时
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&AppSettings::default())
    }
}

impl From<&AppSettings> for ClientOptions {
    fn from(settings: &AppSettings) -> Self {
        Self {
            adapter: settings.adapter.clone(),
            peer_name: settings.peer_name.clone(),
            timeout: settings.scan_timeout(),
        }
    }
}

/// 客户端工作流
pub struct ClientWorkflow {
    options: ClientOptions,
}

impl ClientWorkflow {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }

    /// 执行一次完整的读取，返回服务端特征值
    ///
    /// 所有监听器事件同时转发给 `ui`。
    pub async fn run<F>(&self, ui: &dyn BleListener, shutdown: F) -> anyhow::Result<String>
    where
        F: Future<Output = ()>,
    {
        let adapter = Arc::new(BluerAdapter::new(self.options.adapter.as_deref()).await?);
        let (radio_tx, radio_rx) = mpsc::channel(64);
        let central = Arc::new(BtleplugCentral::new(radio_tx).await?);

        let client = BleClient::with_peer_name(adapter.clone(), central, &self.options.peer_name);
        drive_client(client, adapter, radio_rx, self.options.timeout, ui, shutdown).await
    }
}

/// 客户端事件循环
///
/// 单任务依次处理无线事件和监听器事件；`enable_bluetooth` 在这里通过
/// [`RadioAdapter::request_enable`] 完成，结果交回状态机。
pub async fn drive_client<F>(
    mut client: BleClient,
    adapter: Arc<dyn RadioAdapter>,
    mut radio: mpsc::Receiver<ClientEvent>,
    timeout: Option<Duration>,
    ui: &dyn BleListener,
    shutdown: F,
) -> anyhow::Result<String>
where
    F: Future<Output = ()>,
{
    let (listener, mut events) = ChannelListener::new();
    client.add_listener(Arc::new(listener));

    let deadline = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    if let Err(e) = client.start().await {
        client.stop().await;
        return Err(e.into());
    }

    let result = loop {
        tokio::select! {
            Some(event) = events.recv() => {
                event.dispatch(ui);
                match event {
                    BleEvent::EnableBluetooth => {
                        let enabled = match adapter.request_enable().await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!("Enable request failed: {}", e);
                                false
                            }
                        };
                        if let Err(e) = client.on_enable_result(enabled).await {
                            break Err(e.into());
                        }
                        if !enabled {
                            break Err(anyhow!("Bluetooth was not enabled"));
                        }
                    }
                    BleEvent::Error(message) => break Err(anyhow!(message)),
                    BleEvent::Success(data) => break Ok(data),
                    BleEvent::ScanResult(false) => break Err(anyhow!("BLE scan failed")),
                    BleEvent::ScanResult(true) => {}
                    BleEvent::SessionFailure(failure) => break Err(failure.into()),
                }
            }
            Some(event) = radio.recv() => client.handle_event(event).await,
            () = &mut deadline => {
                break Err(anyhow!("No response within {:?} (state {})", timeout.unwrap_or_default(), client.state()));
            }
            () = &mut shutdown => {
                info!("Client interrupted in state {}", client.state());
                break Err(anyhow!("Interrupted"));
            }
            else => break Err(anyhow!("Event channels closed")),
        }
    };

    client.stop().await;
    result
}
