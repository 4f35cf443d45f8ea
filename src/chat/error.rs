//! 聊天客户端错误类型
//!
//! 内部实现统一使用 `anyhow::Result`，对外 API 在边界处转换为 [`ChatError`]。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// 推送通道建立失败（会自动降级为轮询，只记日志）
    #[error("推送通道连接失败: {0:#}")]
    ChannelOpen(anyhow::Error),

    /// 消息发送失败（网络错误或服务端返回失败），输入内容保留以便重试
    #[error("消息发送失败: {0:#}")]
    Send(anyhow::Error),

    /// 历史消息加载或轮询失败
    #[error("消息加载失败: {0:#}")]
    Fetch(anyhow::Error),

    /// 本地校验失败，未发起任何网络请求
    #[error("{0}")]
    Validation(String),

    /// 客户端已停止
    #[error("聊天客户端已停止")]
    Stopped,
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
