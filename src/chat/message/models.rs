//! 消息本地模型定义

use crate::chat::serialization::format_local_time;
use crate::chat::types::{sender_type, MessageResp};
use chrono::NaiveDateTime;

/// 发送者类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderKind {
    User,
    Plant,
    /// 入场等系统广播
    System,
}

impl SenderKind {
    /// 未知值按用户消息处理
    pub fn parse(s: &str) -> Self {
        match s {
            sender_type::PLANT => SenderKind::Plant,
            sender_type::SYSTEM => SenderKind::System,
            _ => SenderKind::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SenderKind::User => sender_type::USER,
            SenderKind::Plant => sender_type::PLANT,
            SenderKind::System => sender_type::SYSTEM,
        }
    }

    /// 视图层使用的样式类名
    pub fn style_class(&self) -> &'static str {
        match self {
            SenderKind::Plant => "message plant-message",
            SenderKind::System => "message system-message",
            SenderKind::User => "message user-message",
        }
    }
}

/// 投递模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// 未启动或已停止
    Idle,
    /// 已订阅推送通道
    Realtime,
    /// 周期性拉取
    Polling,
}

/// 本地聊天消息
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// 服务端分配的消息 ID，系统广播没有 ID
    pub message_id: Option<i64>,
    pub plant_id: Option<i64>,
    pub state_id: Option<i64>,
    pub plant_name: Option<String>,
    pub sender: SenderKind,
    pub content: String,
    /// 本地时间
    pub created_at: Option<NaiveDateTime>,
}

impl From<MessageResp> for ChatMessage {
    fn from(resp: MessageResp) -> Self {
        Self {
            message_id: resp.message_id,
            plant_id: resp.plant_id,
            state_id: resp.state_id,
            plant_name: resp.plant_name,
            sender: SenderKind::parse(&resp.sender_type),
            content: resp.content,
            created_at: resp.created_at,
        }
    }
}

impl ChatMessage {
    /// 生成视图渲染所需的数据
    pub fn to_rendered(&self) -> RenderedMessage {
        RenderedMessage {
            message_id: self.message_id,
            sender: self.sender,
            style_class: self.sender.style_class(),
            content: self.content.clone(),
            time_label: format_local_time(self.created_at),
        }
    }
}

/// 交给视图追加到消息区域末尾的渲染块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub message_id: Option<i64>,
    pub sender: SenderKind,
    pub style_class: &'static str,
    pub content: String,
    /// `YYYY-MM-DD HH:MM`
    pub time_label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sender_is_styled_as_user() {
        assert_eq!(SenderKind::parse("robot"), SenderKind::User);
        assert_eq!(SenderKind::parse("plant").style_class(), "message plant-message");
    }

    #[test]
    fn rendered_block_carries_time_label() {
        let resp: MessageResp = serde_json::from_value(serde_json::json!({
            "messageId": 9,
            "plantId": 1,
            "senderType": "plant",
            "content": "물 주세요",
            "createdAt": "2024-12-31T23:05:00"
        }))
        .unwrap();
        let rendered = ChatMessage::from(resp).to_rendered();
        assert_eq!(rendered.message_id, Some(9));
        assert_eq!(rendered.sender, SenderKind::Plant);
        assert_eq!(rendered.time_label, "2024-12-31 23:05");
    }
}
