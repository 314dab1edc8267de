//! 服务端工作流
//!
//! 打开 bluer 后端并启动 [`BleServer`]，之后持续响应读请求，直到被中断。
//! 运行期间可以通过 `updates` 通道替换特征值。

use anyhow::anyhow;
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::ble::adapter::{BluerAdapter, RadioAdapter};
use crate::ble::listener::{BleEvent, BleListener, ChannelListener};
use crate::ble::peripheral::{BluerPeripheral, ServerEvent};
use crate::ble::server::{BleServer, ServerState};
use crate::config::AppSettings;

/// 服务端选项
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub adapter: Option<String>,
    /// 广播名称
    pub local_name: String,
    /// 初始特征值
    pub payload: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&AppSettings::default())
    }
}

impl From<&AppSettings> for ServerOptions {
    fn from(settings: &AppSettings) -> Self {
        Self {
            adapter: settings.adapter.clone(),
            local_name: settings.peer_name.clone(),
            payload: settings.payload.clone(),
        }
    }
}

/// 服务端工作流
pub struct ServerWorkflow {
    options: ServerOptions,
}

impl ServerWorkflow {
    pub fn new(options: ServerOptions) -> Self {
        Self { options }
    }

    /// 运行服务端直到 `shutdown` 完成
    pub async fn run<F>(
        &self,
        ui: &dyn BleListener,
        updates: mpsc::Receiver<String>,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let adapter = Arc::new(BluerAdapter::new(self.options.adapter.as_deref()).await?);
        let (radio_tx, radio_rx) = mpsc::channel(64);
        let peripheral = Arc::new(BluerPeripheral::new(adapter.adapter(), radio_tx));

        let server =
            BleServer::with_local_name(adapter.clone(), peripheral, &self.options.local_name);
        server.set_data(self.options.payload.clone()).await;
        drive_server(server, adapter, radio_rx, updates, ui, shutdown).await
    }
}

/// 服务端事件循环
///
/// `updates` 关闭后服务端继续运行，只是不再接受新的特征值。
pub async fn drive_server<F>(
    mut server: BleServer,
    adapter: Arc<dyn RadioAdapter>,
    mut radio: mpsc::Receiver<ServerEvent>,
    mut updates: mpsc::Receiver<String>,
    ui: &dyn BleListener,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let (listener, mut events) = ChannelListener::new();
    server.add_listener(Arc::new(listener));
    tokio::pin!(shutdown);

    if let Err(e) = server.start().await {
        server.stop().await;
        return Err(e.into());
    }

    let mut accepting_updates = true;
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
                        if let Err(e) = server.on_enable_result(enabled).await {
                            break Err(e.into());
                        }
                        if !enabled {
                            break Err(anyhow!("Bluetooth was not enabled"));
                        }
                    }
                    BleEvent::Error(message) => break Err(anyhow!(message)),
                    _ => {}
                }
            }
            Some(event) = radio.recv() => server.handle_event(event).await,
            update = updates.recv(), if accepting_updates => match update {
                Some(data) => {
                    info!("Characteristic value replaced ({} bytes)", data.len());
                    server.set_data(data).await;
                }
                None => accepting_updates = false,
            },
            () = &mut shutdown => {
                if server.state() == ServerState::Running {
                    info!("Server shutting down");
                }
                break Ok(());
            }
        }
    };

    server.stop().await;
    result
}
