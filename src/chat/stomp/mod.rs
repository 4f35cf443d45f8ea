//! 推送通道模块
//!
//! STOMP 1.2 帧编解码以及基于 WebSocket 的发布/订阅通道

pub mod channel;
pub mod frame;

pub use channel::{PushChannel, PushConnector, StompChannel, StompConnector};
pub use frame::StompFrame;
