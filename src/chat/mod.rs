pub mod auto_reply;
pub mod client;
pub mod error;
pub mod message;
pub mod serialization;
pub mod stomp;
pub mod types;

// 重新导出客户端相关类型
pub use client::{ChatClient, ChatConfig, SendOutcome};
pub use error::{ChatError, ChatResult};
