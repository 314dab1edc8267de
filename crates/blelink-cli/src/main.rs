//! BleLink CLI
//!
//! 命令行入口：`client` 读取服务端特征，`server` 广播并提供特征值。

mod console;

use anyhow::Result;
use blelink_core::{
    AppSettings, ClientOptions, ClientWorkflow, LogLevel, ServerOptions, ServerWorkflow,
};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use console::ConsoleListener;

#[derive(Parser)]
#[command(name = "blelink", version, about = "BLE 双角色演示 - 广播、连接并读取特征")]
struct Cli {
    /// 日志级别 (error/warn/info/debug/trace)，覆盖 RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描服务端并读取一次特征值
    Client {
        /// 适配器名称 (如 hci0)
        #[arg(short, long)]
        adapter: Option<String>,
        /// 超时时间 (秒)，0 表示不限
        #[arg(short, long)]
        timeout: Option<u64>,
        /// 每个事件输出一行 JSON
        #[arg(long)]
        json: bool,
    },
    /// 启动服务端，标准输入的每一行替换特征值
    Server {
        /// 适配器名称 (如 hci0)
        #[arg(short, long)]
        adapter: Option<String>,
        /// 初始特征值
        #[arg(short, long)]
        payload: Option<String>,
    },
    /// 查看配置
    Config {
        /// 配置文件不存在时写入默认配置
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(level: Option<LogLevel>) {
    // 桥接 log crate（blelink-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let filter = match level {
        Some(level) => EnvFilter::new(level.filter_directive()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,blelink_core=debug")),
    };

    // 日志走 stderr，stdout 留给结果输出
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = AppSettings::load();

    let level = cli
        .log_level
        .or_else(|| settings.verbose.then_some(LogLevel::Debug));
    init_tracing(level);

    match cli.command {
        Commands::Client {
            adapter,
            timeout,
            json,
        } => {
            let mut options = ClientOptions::from(&settings);
            if adapter.is_some() {
                options.adapter = adapter;
            }
            if let Some(secs) = timeout {
                options.timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }

            if !json {
                println!("🔍 正在查找服务端: {}", options.peer_name);
            }
            let ui = ConsoleListener::new(json);
            ClientWorkflow::new(options)
                .run(&ui, shutdown_signal())
                .await?;
        }
        Commands::Server { adapter, payload } => {
            let mut options = ServerOptions::from(&settings);
            if adapter.is_some() {
                options.adapter = adapter;
            }
            if let Some(payload) = payload {
                options.payload = payload;
            }

            println!("📡 服务端: {} (特征值: {})", options.local_name, options.payload);
            println!("   输入一行文字并回车以替换特征值，Ctrl-C 退出");

            let (updates_tx, updates_rx) = mpsc::channel(8);
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if updates_tx.send(line).await.is_err() {
                        break;
                    }
                }
            });

            let ui = ConsoleListener::new(false);
            ServerWorkflow::new(options)
                .run(&ui, updates_rx, shutdown_signal())
                .await?;
            println!("⏹️  服务端已停止");
        }
        Commands::Config { init } => {
            let path = AppSettings::config_path();
            if init && !path.exists() {
                settings.save_to(&path)?;
                println!("📝 已写入默认配置");
            }
            println!("配置文件: {}", path.display());
            print!("{}", settings_lines(&settings));
        }
    }

    Ok(())
}

fn settings_lines(settings: &AppSettings) -> String {
    serde_json::to_value(settings)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .map(|map| {
            map.iter()
                .map(|(k, v)| format!("   {k} = {v}\n"))
                .collect()
        })
        .unwrap_or_default()
}
