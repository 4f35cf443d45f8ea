use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// STOMP 目的地命名（与服务端 `/app`、`/topic` 前缀约定一致）
pub mod destination {
    /// 订阅：某个植物会话的公共频道
    pub fn public_topic(plant_id: i64) -> String {
        format!("/topic/public/{}", plant_id)
    }

    /// 发布：发送聊天消息
    pub fn send_message(plant_id: i64) -> String {
        format!("/app/chat.sendMessage/{}", plant_id)
    }

    /// 发布：用户入场通知
    pub fn add_user(plant_id: i64) -> String {
        format!("/app/chat.addUser/{}", plant_id)
    }
}

/// 发送者类型（服务端只会写入 user / plant，system 仅出现在入场广播中）
pub mod sender_type {
    pub const USER: &str = "user";
    pub const PLANT: &str = "plant";
    pub const SYSTEM: &str = "system";
}

/// 创建消息请求（`POST /api/message` 与 STOMP 发布共用）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageReq {
    pub plant_id: i64,
    pub sender_type: String,
    pub content: String,
}

impl SendMessageReq {
    /// 以用户身份构造请求
    pub fn from_user(plant_id: i64, content: impl Into<String>) -> Self {
        Self {
            plant_id,
            sender_type: sender_type::USER.to_string(),
            content: content.into(),
        }
    }
}

/// 服务端消息结构（HTTP 响应体和订阅推送体都是这个格式）
///
/// 入场广播没有 `messageId` 和 `createdAt`，因此都是可选字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageResp {
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub plant_id: Option<i64>,
    #[serde(default)]
    pub state_id: Option<i64>,
    #[serde(default)]
    pub plant_name: Option<String>,
    #[serde(default)]
    pub sender_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "crate::chat::serialization::deserialize_created_at"
    )]
    pub created_at: Option<NaiveDateTime>,
}

/// 植物最新状态（自动回复触发器只关心 stateId）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantStateResp {
    pub state_id: i64,
    #[serde(default)]
    pub plant_id: Option<i64>,
}

/// 统一的 API 响应包装结构体（包含 success、message、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 取出 data，缺失时视为错误
    pub fn into_data(self, operation_name: &str) -> anyhow::Result<T> {
        self.data
            .ok_or_else(|| anyhow::anyhow!("{}响应中缺少 data 字段", operation_name))
    }
}

/// 通用 HTTP 响应处理函数：反序列化为统一的响应结构体
///
/// 非 2xx 状态和 `success:false` 都转换为错误，错误文本优先使用服务端返回的 message
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    use anyhow::Context;
    use tracing::{debug, error};

    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        let server_msg = serde_json::from_slice::<ApiResponse<serde_json::Value>>(&body_bytes)
            .ok()
            .and_then(|r| r.message)
            .unwrap_or_else(|| body_str.to_string());
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, server_msg));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })?;

    if !api_resp.success {
        let msg = api_resp.message.unwrap_or_else(|| "未知错误".to_string());
        error!("[HTTP] {}服务器返回失败: {}", operation_name, msg);
        return Err(anyhow::anyhow!("{}", msg));
    }

    Ok(api_resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations_are_scoped_by_plant() {
        assert_eq!(destination::public_topic(7), "/topic/public/7");
        assert_eq!(destination::send_message(7), "/app/chat.sendMessage/7");
        assert_eq!(destination::add_user(7), "/app/chat.addUser/7");
    }

    #[test]
    fn join_broadcast_without_id_deserializes() {
        let body = r#"{"plantId":3,"senderType":"system","content":"Guest joined","messageId":null}"#;
        let msg: MessageResp = serde_json::from_str(body).unwrap();
        assert_eq!(msg.message_id, None);
        assert_eq!(msg.created_at, None);
        assert_eq!(msg.sender_type, sender_type::SYSTEM);
    }

    #[test]
    fn send_request_uses_camel_case() {
        let req = SendMessageReq::from_user(4, "hi");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"plantId": 4, "senderType": "user", "content": "hi"})
        );
    }
}
