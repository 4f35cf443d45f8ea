//! 渲染账本：水位线 + 已渲染 ID 集合
//!
//! 保证同一个消息 ID 在整个会话中只渲染一次，水位线只增不减。

use super::models::ChatMessage;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct RenderLedger {
    watermark: i64,
    rendered: HashSet<i64>,
}

impl RenderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已渲染的最大消息 ID
    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// 全量历史：不假设服务端顺序，按 ID 升序返回尚未渲染的消息，水位线推进到最大 ID
    pub fn accept_history(&mut self, mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        messages.sort_by_key(|m| m.message_id);
        messages
            .into_iter()
            .filter_map(|m| self.accept(m))
            .collect()
    }

    /// 轮询对账
    ///
    /// 只有本次最大 ID 超过水位线时才有新消息；返回 ID 严格大于旧水位线的消息（升序），
    /// 然后把水位线推进到新的最大值。
    pub fn reconcile(&mut self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let latest = match messages.iter().filter_map(|m| m.message_id).max() {
            Some(id) => id,
            None => return Vec::new(),
        };
        if latest <= self.watermark {
            return Vec::new();
        }

        let previous = self.watermark;
        let mut fresh: Vec<ChatMessage> = messages
            .into_iter()
            .filter(|m| matches!(m.message_id, Some(id) if id > previous))
            .collect();
        fresh.sort_by_key(|m| m.message_id);

        let accepted = fresh
            .into_iter()
            .filter(|m| m.message_id.is_some_and(|id| self.rendered.insert(id)))
            .collect();
        self.advance(latest);
        accepted
    }

    /// 单条消息（推送回显 / HTTP 发送回执）；已渲染过返回 None
    ///
    /// 没有 ID 的系统广播总是被接受
    pub fn accept(&mut self, message: ChatMessage) -> Option<ChatMessage> {
        let Some(id) = message.message_id else {
            return Some(message);
        };
        if !self.rendered.insert(id) {
            return None;
        }
        self.advance(id);
        Some(message)
    }

    fn advance(&mut self, message_id: i64) {
        if message_id > self.watermark {
            self.watermark = message_id;
        }
    }
}
