use uuid::Uuid;

/// BLE 错误
#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("{0} session is already active")]
    AlreadyActive(&'static str),

    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Unknown connection: {0}")]
    UnknownConnection(u64),

    #[error("btleplug error: {0}")]
    Btleplug(#[from] btleplug::Error),

    #[error("BlueZ error: {0}")]
    Bluer(#[from] bluer::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}
