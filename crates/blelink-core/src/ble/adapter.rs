//! 蓝牙适配器能力
//!
//! 客户端和服务端启动前都要确认适配器存在且已开启。

use log::{debug, info, warn};

use crate::error::BleError;

#[async_trait::async_trait]
pub trait RadioAdapter: Send + Sync {
    /// 系统中是否存在可用的适配器
    async fn is_available(&self) -> bool;
    /// 适配器是否已开启
    async fn is_enabled(&self) -> bool;
    /// 请求开启适配器
    async fn request_enable(&self) -> Result<(), BleError>;
}

/// 基于 BlueZ (bluer) 的适配器
pub struct BluerAdapter {
    _session: bluer::Session,
    adapter: Option<bluer::Adapter>,
}

impl BluerAdapter {
    /// 打开指定名称（如 `hci0`）或默认适配器
    ///
    /// 找不到适配器不算错误，`is_available` 会返回 `false`。
    pub async fn new(name: Option<&str>) -> Result<Self, BleError> {
        let session = bluer::Session::new().await?;
        let adapter = match name {
            Some(name) => session.adapter(name).ok(),
            None => session.default_adapter().await.ok(),
        };
        match &adapter {
            Some(a) => debug!("Using Bluetooth adapter '{}'", a.name()),
            None => warn!("No Bluetooth adapter found"),
        }
        Ok(Self {
            _session: session,
            adapter,
        })
    }

    /// 底层 bluer 适配器，供 GATT Server 使用
    pub fn adapter(&self) -> Option<bluer::Adapter> {
        self.adapter.clone()
    }
}

#[async_trait::async_trait]
impl RadioAdapter for BluerAdapter {
    async fn is_available(&self) -> bool {
        match &self.adapter {
            // 指定名称的适配器可能并不存在，用一次属性查询确认
            Some(adapter) => adapter.address().await.is_ok(),
            None => false,
        }
    }

    async fn is_enabled(&self) -> bool {
        let Some(adapter) = &self.adapter else {
            return false;
        };
        match adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                warn!("Failed to query adapter power state: {}", e);
                false
            }
        }
    }

    async fn request_enable(&self) -> Result<(), BleError> {
        let adapter = self.adapter.as_ref().ok_or(BleError::NoAdapter)?;
        info!("Powering on adapter '{}'", adapter.name());
        adapter.set_powered(true).await?;
        Ok(())
    }
}
