pub mod chat;

// 重新导出常用类型，方便外部使用
pub use chat::{
    client::{ChatClient, ChatConfig, SendOutcome},
    error::{ChatError, ChatResult},
    message::{ChatViewListener, DeliveryMode, RenderedMessage, SenderKind},
    stomp::{PushChannel, PushConnector},
};
