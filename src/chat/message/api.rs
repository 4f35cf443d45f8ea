//! 消息 HTTP API 客户端
//!
//! 负责所有消息相关的 HTTP 请求

use crate::chat::types::{handle_http_response, MessageResp, SendMessageReq};
use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 历史分页的上限，防止服务端忽略 `page` 参数时无限翻页
const MAX_HISTORY_PAGES: u32 = 10_000;

/// 消息相关的 HTTP API 客户端
#[derive(Clone)]
pub struct MessageApi {
    client: reqwest::Client,
    api_base_url: String,
    page_size: u32,
}

impl MessageApi {
    /// 创建新的消息 API 客户端
    ///
    /// `page_size` 是每次请求历史接口的分页大小（服务端默认只返回 10 条）
    pub fn new(client: reqwest::Client, api_base_url: String, page_size: u32) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        }
    }

    /// 获取某个植物会话的全部消息（服务端顺序不可信）
    ///
    /// 从第 0 页开始逐页请求，直到某一页不满为止。
    /// 单条记录解析失败只丢弃该条。
    pub async fn fetch_history(&self, plant_id: i64) -> Result<Vec<MessageResp>> {
        let mut messages = Vec::new();
        for page in 0..MAX_HISTORY_PAGES {
            let records = self.fetch_history_page(plant_id, page).await?;
            let last_page = records.len() < self.page_size as usize;
            messages.extend(records.into_iter().filter_map(|record| {
                match serde_json::from_value::<MessageResp>(record.clone()) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!("[ChatAPI/History] 丢弃无法解析的消息: {}, 原始数据: {}", e, record);
                        None
                    }
                }
            }));
            if last_page {
                debug!(
                    "[ChatAPI/History] 📥 共收到 {} 条消息 ({} 页)",
                    messages.len(),
                    page + 1
                );
                return Ok(messages);
            }
        }
        warn!(
            "[ChatAPI/History] 历史分页超过 {} 页，停止翻页 (plantId={})",
            MAX_HISTORY_PAGES, plant_id
        );
        Ok(messages)
    }

    async fn fetch_history_page(&self, plant_id: i64, page: u32) -> Result<Vec<serde_json::Value>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/api/message/plant/{}", self.api_base_url, plant_id);

        debug!(
            "[ChatAPI/History] 📡 请求历史消息: plantId={}, page={}, 操作ID: {}",
            plant_id, page, operation_id
        );

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .query(&[("page", page), ("size", self.page_size)])
            .send()
            .await
            .context("请求历史消息失败")?;

        let resp = handle_http_response::<Vec<serde_json::Value>>(response, "历史消息").await?;
        Ok(resp.data.unwrap_or_default())
    }

    /// 通过 HTTP 创建消息（推送通道不可用时使用）
    pub async fn create_message(&self, req: &SendMessageReq) -> Result<MessageResp> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/api/message", self.api_base_url);

        info!(
            "[ChatAPI/Send] 📤 HTTP 发送消息: plantId={}, 操作ID: {}",
            req.plant_id, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(req)
            .send()
            .await
            .context("请求发送消息失败")?;

        handle_http_response::<MessageResp>(response, "发送消息")
            .await?
            .into_data("发送消息")
    }

    /// 按植物状态生成植物回复
    pub async fn generate_plant_message(&self, plant_id: i64, state_id: i64) -> Result<MessageResp> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}/api/message/plant/{}/state/{}/generate",
            self.api_base_url, plant_id, state_id
        );

        debug!(
            "[ChatAPI/Generate] 🌱 请求生成植物回复: plantId={}, stateId={}",
            plant_id, state_id
        );

        let response = self
            .client
            .post(&url)
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求生成植物回复失败")?;

        handle_http_response::<MessageResp>(response, "生成植物回复")
            .await?
            .into_data("生成植物回复")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> MessageApi {
        MessageApi::new(reqwest::Client::new(), server.uri(), 500)
    }

    #[tokio::test]
    async fn fetch_history_passes_page_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/message/plant/3"))
            .and(query_param("size", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": [
                    {"messageId": 2, "plantId": 3, "senderType": "plant", "content": "b", "createdAt": "2024-01-01T10:00:00"},
                    {"messageId": 1, "plantId": 3, "senderType": "user", "content": "a", "createdAt": "2024-01-01T09:59:00"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let messages = api(&server).fetch_history(3).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_id, Some(2));
    }

    #[tokio::test]
    async fn fetch_history_walks_pages_until_a_short_one() {
        let server = MockServer::start().await;
        for (page, ids) in [("0", vec![1, 2]), ("1", vec![3, 4]), ("2", vec![5])] {
            let data: Vec<_> = ids
                .iter()
                .map(|id| serde_json::json!({"messageId": id, "plantId": 3, "senderType": "user", "content": "x"}))
                .collect();
            Mock::given(method("GET"))
                .and(path("/api/message/plant/3"))
                .and(query_param("page", page))
                .and(query_param("size", "2"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({"success": true, "data": data})),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let api = MessageApi::new(reqwest::Client::new(), server.uri(), 2);
        let ids: Vec<_> = api
            .fetch_history(3)
            .await
            .unwrap()
            .iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3), Some(4), Some(5)]);
    }

    #[tokio::test]
    async fn fetch_history_drops_only_the_broken_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/message/plant/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": [
                    {"messageId": 1, "plantId": 3, "senderType": "user", "content": "a"},
                    {"messageId": "two", "plantId": 3, "senderType": "user", "content": "b"},
                    {"messageId": 3, "plantId": 3, "senderType": "plant", "content": "c", "createdAt": "not-a-date"}
                ]
            })))
            .mount(&server)
            .await;

        let messages = api(&server).fetch_history(3).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
        assert_eq!(messages[1].created_at, None);
    }

    #[tokio::test]
    async fn fetch_history_with_null_data_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/message/plant/3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"success": true, "data": null})),
            )
            .mount(&server)
            .await;

        assert!(api(&server).fetch_history(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_message_posts_user_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/message"))
            .and(body_json(serde_json::json!({
                "plantId": 3, "senderType": "user", "content": "안녕"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "success": true,
                "message": "ok",
                "data": {"messageId": 5, "plantId": 3, "senderType": "user", "content": "안녕", "createdAt": "2024-01-01T10:00:00"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = api(&server)
            .create_message(&SendMessageReq::from_user(3, "안녕"))
            .await
            .unwrap();
        assert_eq!(created.message_id, Some(5));
    }

    #[tokio::test]
    async fn not_found_surfaces_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/message"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "success": false, "message": "plant missing", "data": null
            })))
            .mount(&server)
            .await;

        let err = api(&server)
            .create_message(&SendMessageReq::from_user(3, "x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("plant missing"));
    }

    #[tokio::test]
    async fn success_false_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/message"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"success": false, "message": "x"})),
            )
            .mount(&server)
            .await;

        let err = api(&server)
            .create_message(&SendMessageReq::from_user(3, "hello"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "x");
    }
}
