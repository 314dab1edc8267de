//! 工作流模块
//!
//! 提供高层 API 封装完整的客户端读取和服务端响应流程

pub mod client;
pub mod server;

pub use client::{ClientOptions, ClientWorkflow, drive_client};
pub use server::{ServerOptions, ServerWorkflow, drive_server};
