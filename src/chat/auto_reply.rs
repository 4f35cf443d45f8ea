//! 植物自动回复触发器（仅 HTTP 模式使用）
//!
//! 推送模式下服务端收到用户消息后会自己生成回复并广播；
//! 没有推送通道时由客户端按最新植物状态请求生成接口。

use crate::chat::message::MessageApi;
use crate::chat::types::{handle_http_response, MessageResp, PlantStateResp};
use anyhow::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AutoReply {
    client: reqwest::Client,
    api_base_url: String,
    messages: MessageApi,
}

impl AutoReply {
    pub fn new(client: reqwest::Client, api_base_url: String, messages: MessageApi) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            messages,
        }
    }

    /// 获取植物最新状态
    pub async fn latest_state(&self, plant_id: i64) -> Result<PlantStateResp> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/api/state/plant/{}/latest", self.api_base_url, plant_id);
        debug!("[AutoReply] 📡 请求最新状态: plantId={}", plant_id);

        let response = self
            .client
            .get(&url)
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求最新状态失败")?;

        handle_http_response::<PlantStateResp>(response, "最新状态")
            .await?
            .into_data("最新状态")
    }

    /// 最新状态 → 生成植物回复
    pub async fn request_reply(&self, plant_id: i64) -> Result<MessageResp> {
        let state = self.latest_state(plant_id).await?;
        info!(
            "[AutoReply] 🌱 按状态生成回复: plantId={}, stateId={}",
            plant_id, state.state_id
        );
        self.messages
            .generate_plant_message(plant_id, state.state_id)
            .await
    }
}
