//! GATT 层定义：状态码、服务描述和特征值编解码

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ble::{CHAR_UUID, SERVICE_UUID};

/// GATT 操作状态
///
/// 数值与 ATT 错误码 / Android `BluetoothGatt` 常量一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    RequestNotSupported,
    InvalidOffset,
    Failure,
}

impl GattStatus {
    pub fn code(self) -> u16 {
        match self {
            GattStatus::Success => 0x00,
            GattStatus::ReadNotPermitted => 0x02,
            GattStatus::RequestNotSupported => 0x06,
            GattStatus::InvalidOffset => 0x07,
            GattStatus::Failure => 0x101,
        }
    }

    pub fn is_success(self) -> bool {
        self == GattStatus::Success
    }
}

/// 特征描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicSpec {
    pub uuid: Uuid,
    pub read: bool,
    pub notify: bool,
    /// 读权限（无需加密）
    pub read_permission: bool,
}

/// 服务描述，服务端注册到 GATT Server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServiceSpec {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicSpec>,
}

impl GattServiceSpec {
    /// 单服务单特征：READ | NOTIFY，读权限
    pub fn exchange() -> Self {
        Self {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics: vec![CharacteristicSpec {
                uuid: CHAR_UUID,
                read: true,
                notify: true,
                read_permission: true,
            }],
        }
    }
}

/// 服务端收到的读请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub device: String,
    pub request_id: u32,
    pub offset: usize,
    pub characteristic: Uuid,
}

/// 服务端对读请求的响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub device: String,
    pub request_id: u32,
    pub status: GattStatus,
    pub offset: usize,
    pub value: Vec<u8>,
}

impl ReadResponse {
    /// 按请求偏移量截取特征值
    ///
    /// 偏移量超过长度时返回 `InvalidOffset` 和空值。
    pub fn for_request(request: &ReadRequest, payload: &[u8]) -> Self {
        let (status, value) = match payload.get(request.offset..) {
            Some(rest) => (GattStatus::Success, rest.to_vec()),
            None => (GattStatus::InvalidOffset, Vec::new()),
        };
        Self {
            device: request.device.clone(),
            request_id: request.request_id,
            status,
            offset: request.offset,
            value,
        }
    }
}

/// 把特征值解码为文本，非法 UTF-8 按替换字符处理
pub fn decode_payload(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}
