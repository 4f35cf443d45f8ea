//! PlantTalk 聊天 CLI 客户端
//!
//! 终端版聊天视图：加入某个植物的会话，打印收到的消息，
//! 标准输入的每一行作为一条消息发送。

use anyhow::{Context, Result};
use clap::Parser;
use plantalk_chat_client::{
    ChatClient, ChatConfig, ChatViewListener, DeliveryMode, RenderedMessage, SendOutcome,
    SenderKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// PlantTalk 聊天 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "plantalk-cli")]
#[command(about = "PlantTalk 聊天 CLI - 与植物聊天（推送优先，轮询兜底）", long_about = None)]
struct Args {
    /// 植物 ID（不指定时只能看到提示，无法发送）
    #[arg(short, long)]
    plant_id: Option<i64>,

    /// HTTP API 地址
    #[arg(long, default_value = "http://localhost:8080")]
    api_base_url: String,

    /// STOMP WebSocket 地址
    #[arg(long, default_value = "ws://localhost:8080/ws/websocket")]
    ws_url: String,

    /// 禁用推送通道，只使用 HTTP 轮询
    #[arg(long)]
    no_realtime: bool,

    /// HTTP 模式下发送后请求植物自动回复
    #[arg(long)]
    auto_response: bool,

    /// 轮询间隔（秒）
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// 入场名字
    #[arg(long, default_value = "Guest")]
    join_name: String,

    /// 运行时长（秒），0 表示直到输入结束或 Ctrl+C
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,plantalk_chat_client=debug）
    #[arg(long, default_value = "info,plantalk_chat_client=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .context("无法创建日志文件 debug.log")?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
    Ok(())
}

/// 终端视图
struct CliView;

#[async_trait::async_trait]
impl ChatViewListener for CliView {
    async fn on_render_message(&self, message: RenderedMessage) {
        let who = match message.sender {
            SenderKind::Plant => "🌱",
            SenderKind::User => "🙂",
            SenderKind::System => "📢",
        };
        info!(
            "[CLI/Message] {} {} [{}]",
            who, message.content, message.time_label
        );
    }

    async fn on_alert(&self, text: String) {
        error!("[CLI/Alert] ⚠️ {}", text);
    }

    async fn on_prompt(&self, text: String) {
        warn!("[CLI/Prompt] 💡 {}", text);
    }

    async fn on_delivery_mode_changed(&self, mode: DeliveryMode) {
        info!("[CLI/Mode] 🔗 投递模式: {:?}", mode);
    }
}

/// 逐行读取标准输入并发送
async fn input_loop(client: ChatClient) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match client.send(&line).await {
                Ok(SendOutcome::Published) => {}
                Ok(SendOutcome::Delivered { message_id }) => {
                    info!("[CLI] ✅ 已发送 (messageId={:?})", message_id);
                }
                // 错误已经通过视图提示
                Err(_) => {}
            },
            Ok(None) => {
                info!("[CLI] 输入结束");
                break;
            }
            Err(e) => {
                error!("[CLI] 读取输入失败: {}", e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    info!("[CLI] 🚀 PlantTalk 聊天客户端");
    info!("[CLI] 🌱 植物ID: {:?}", args.plant_id);

    let config = ChatConfig {
        api_base_url: args.api_base_url,
        ws_url: args.ws_url,
        realtime_enabled: !args.no_realtime,
        poll_interval: Duration::from_secs(args.poll_interval_secs.max(1)),
        join_name: args.join_name,
        auto_response: args.auto_response,
        ..ChatConfig::new()
    };

    let mut client = ChatClient::new(config)?;
    client.set_view_listener(Arc::new(CliView));

    let mode = client
        .start(args.plant_id)
        .await
        .map_err(|e| anyhow::anyhow!("启动失败: {}", e))?;
    info!("[CLI] ✅ 会话已启动，模式: {:?}", mode);
    info!("[CLI] 💡 输入消息后回车发送，Ctrl+C 退出");

    let input = input_loop(client.clone());
    if args.duration > 0 {
        tokio::select! {
            _ = input => {}
            _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {
                info!("[CLI] ⏰ 运行时长已到");
            }
            _ = tokio::signal::ctrl_c() => {}
        }
    } else {
        tokio::select! {
            _ = input => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    client.stop().await;
    info!("[CLI] 👋 程序退出");
    Ok(())
}
