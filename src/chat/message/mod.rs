//! 消息模块
//!
//! 消息模型、渲染账本、HTTP API 以及视图回调

pub mod api;
pub mod ledger;
pub mod listener;
pub mod models;

// 重新导出主要类型
pub use api::MessageApi;
pub use ledger::RenderLedger;
pub use listener::{ChatViewListener, EmptyChatViewListener};
pub use models::{ChatMessage, DeliveryMode, RenderedMessage, SenderKind};
