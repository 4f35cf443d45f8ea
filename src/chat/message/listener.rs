//! 聊天视图监听器
//!
//! 客户端不直接操作任何 UI，所有展示都通过此回调接口交给调用方。

use super::models::{DeliveryMode, RenderedMessage};
use async_trait::async_trait;

/// 聊天视图监听器
///
/// 回调在客户端内部锁内被调用，实现方不能在回调里再调用 `ChatClient` 的方法。
#[async_trait]
pub trait ChatViewListener: Send + Sync {
    /// 追加一条消息到消息区域末尾，并滚动到底部
    async fn on_render_message(&self, message: RenderedMessage);

    /// 错误提示（发送失败等）
    async fn on_alert(&self, text: String);

    /// 操作提示（例如先选择植物）
    async fn on_prompt(&self, text: String);

    /// 投递模式变化
    async fn on_delivery_mode_changed(&self, mode: DeliveryMode);
}

/// 空实现（默认监听器）
pub struct EmptyChatViewListener;

#[async_trait]
impl ChatViewListener for EmptyChatViewListener {
    async fn on_render_message(&self, _message: RenderedMessage) {}
    async fn on_alert(&self, _text: String) {}
    async fn on_prompt(&self, _text: String) {}
    async fn on_delivery_mode_changed(&self, _mode: DeliveryMode) {}
}
