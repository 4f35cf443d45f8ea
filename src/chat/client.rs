//! 聊天投递客户端核心实现模块
//!
//! 一个客户端实例只服务一个植物会话：优先使用 STOMP 推送通道，
//! 连接失败（或中途断开）时降级为 HTTP 轮询，且不会自动切回推送。

use crate::chat::auto_reply::AutoReply;
use crate::chat::error::{ChatError, ChatResult};
use crate::chat::message::{
    ChatMessage, ChatViewListener, DeliveryMode, EmptyChatViewListener, MessageApi, RenderLedger,
};
use crate::chat::stomp::{PushChannel, PushConnector, StompConnector};
use crate::chat::types::{destination, MessageResp, SendMessageReq};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 轮询间隔下限（`tokio::time::interval` 不接受零）
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// STOMP WebSocket 地址（SockJS 端点的原生 WebSocket 传输）
    pub ws_url: String,
    /// 是否尝试推送通道；关闭时直接使用 HTTP 轮询
    pub realtime_enabled: bool,
    /// 轮询间隔
    pub poll_interval: Duration,
    /// 历史消息分页大小（客户端会逐页拉取全部历史）
    pub history_page_size: u32,
    /// 入场通知里使用的名字
    pub join_name: String,
    /// HTTP 模式下发送成功后是否请求植物自动回复
    pub auto_response: bool,
    /// 推送通道握手超时
    pub connect_timeout: Duration,
}

impl ChatConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            ws_url: "ws://localhost:8080/ws/websocket".to_string(),
            realtime_enabled: true,
            poll_interval: Duration::from_secs(5),
            history_page_size: 1000,
            join_name: "Guest".to_string(),
            auto_response: false,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 发送结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 已发布到推送通道，渲染等待订阅回显
    Published,
    /// 已通过 HTTP 创建并渲染
    Delivered { message_id: Option<i64> },
}

struct ClientState {
    plant_id: Option<i64>,
    mode: DeliveryMode,
    ledger: RenderLedger,
    channel: Option<Arc<dyn PushChannel>>,
    tasks: Vec<JoinHandle<()>>,
    /// 每次 `start` 递增，用来识别被取代的启动过程
    generation: u64,
    stopped: bool,
}

impl ClientState {
    fn new() -> Self {
        Self {
            plant_id: None,
            mode: DeliveryMode::Idle,
            ledger: RenderLedger::new(),
            channel: None,
            tasks: Vec::new(),
            generation: 0,
            stopped: false,
        }
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    /// 取消后台任务并关闭推送通道
    async fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        self.mode = DeliveryMode::Idle;
    }
}

/// 聊天投递客户端
///
/// 生命周期：`start(plant_id)` → 若干次 `send` → `stop()`。
/// 必须显式调用 `stop()`，后台任务持有客户端的克隆。
#[derive(Clone)]
pub struct ChatClient {
    config: ChatConfig,
    api: MessageApi,
    auto_reply: AutoReply,
    connector: Arc<dyn PushConnector>,
    listener: Arc<dyn ChatViewListener>,
    state: Arc<Mutex<ClientState>>,
}

impl ChatClient {
    /// 使用 STOMP 推送通道创建客户端
    pub fn new(config: ChatConfig) -> anyhow::Result<Self> {
        let connector = Arc::new(StompConnector::new(
            config.ws_url.clone(),
            config.connect_timeout,
        ));
        Self::with_connector(config, connector)
    }

    /// 使用自定义推送通道连接器创建客户端
    pub fn with_connector(
        config: ChatConfig,
        connector: Arc<dyn PushConnector>,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .build()
            .context("创建 HTTP 客户端失败")?;
        let api = MessageApi::new(
            http_client.clone(),
            config.api_base_url.clone(),
            config.history_page_size,
        );
        let auto_reply = AutoReply::new(http_client, config.api_base_url.clone(), api.clone());
        Ok(Self {
            config,
            api,
            auto_reply,
            connector,
            listener: Arc::new(EmptyChatViewListener),
            state: Arc::new(Mutex::new(ClientState::new())),
        })
    }

    /// 注册视图监听器（需在 `start` 之前调用）
    pub fn set_view_listener(&mut self, listener: Arc<dyn ChatViewListener>) {
        self.listener = listener;
    }

    pub async fn mode(&self) -> DeliveryMode {
        self.state.lock().await.mode
    }

    pub async fn watermark(&self) -> i64 {
        self.state.lock().await.ledger.watermark()
    }

    /// 启动会话
    ///
    /// `plant_id` 为空时不建立任何通道，之后的发送都会提示先选择植物。
    /// 已有活动会话时先拆除旧会话。握手和历史请求都在锁外进行，
    /// 期间调用 `stop()` 不会被阻塞；被 `stop()` 打断时返回 `Stopped`，
    /// 被更新的 `start` 取代时返回 `Idle`。
    pub async fn start(&self, plant_id: Option<i64>) -> ChatResult<DeliveryMode> {
        let generation = {
            let mut state = self.state.lock().await;
            if state.stopped {
                return Err(ChatError::Stopped);
            }
            if state.mode != DeliveryMode::Idle {
                info!("[Chat] 🔄 切换会话，拆除旧会话: {:?}", state.plant_id);
                state.teardown().await;
            }
            state.ledger = RenderLedger::new();
            state.plant_id = plant_id;
            state.generation += 1;
            state.generation
        };

        let Some(plant_id) = plant_id else {
            info!("[Chat] 未选择植物，不建立消息通道");
            return Ok(DeliveryMode::Idle);
        };

        if self.config.realtime_enabled {
            match self.connector.connect().await {
                Ok(channel) => {
                    match self.start_realtime(generation, plant_id, channel.clone()).await {
                        Ok(outcome) => return outcome,
                        Err(e) => {
                            warn!("[Chat] ⚠️ {}，切换为 HTTP 轮询", e);
                            channel.close().await;
                        }
                    }
                }
                Err(e) => {
                    let e = ChatError::ChannelOpen(e);
                    warn!("[Chat] ⚠️ {}，切换为 HTTP 轮询", e);
                }
            }
        } else {
            info!("[Chat] 推送通道已禁用，使用 HTTP 轮询 (plantId={})", plant_id);
        }

        let history = self.api.fetch_history(plant_id).await;
        let mut state = self.state.lock().await;
        if let Some(superseded) = Self::superseded(&state, generation) {
            return superseded;
        }
        self.start_polling(&mut state, plant_id, history).await;
        Ok(state.mode)
    }

    /// 启动过程中状态已被 `stop()` 或新的 `start` 改变
    fn superseded(state: &ClientState, generation: u64) -> Option<ChatResult<DeliveryMode>> {
        if state.stopped {
            Some(Err(ChatError::Stopped))
        } else if state.generation != generation {
            Some(Ok(DeliveryMode::Idle))
        } else {
            None
        }
    }

    /// 推送模式：先订阅（缓冲期间的推送），再发送入场通知、加载历史，最后开始分发推送
    ///
    /// 外层 `Err` 表示通道不可用，应降级为轮询。
    async fn start_realtime(
        &self,
        generation: u64,
        plant_id: i64,
        channel: Arc<dyn PushChannel>,
    ) -> ChatResult<ChatResult<DeliveryMode>> {
        let superseded = Self::superseded(&*self.state.lock().await, generation);
        if let Some(superseded) = superseded {
            channel.close().await;
            return Ok(superseded);
        }

        let rx = channel
            .subscribe(&destination::public_topic(plant_id))
            .await
            .map_err(ChatError::ChannelOpen)?;

        let join = SendMessageReq::from_user(plant_id, self.config.join_name.clone());
        match serde_json::to_string(&join) {
            Ok(body) => {
                if let Err(e) = channel.publish(&destination::add_user(plant_id), body).await {
                    warn!("[Chat] 入场通知发送失败: {:#}", e);
                }
            }
            Err(e) => warn!("[Chat] 入场通知序列化失败: {}", e),
        }

        let history = self.api.fetch_history(plant_id).await;

        let mut state = self.state.lock().await;
        if let Some(superseded) = Self::superseded(&state, generation) {
            channel.close().await;
            return Ok(superseded);
        }
        state.channel = Some(channel);
        self.set_mode(&mut state, DeliveryMode::Realtime).await;
        self.apply_history(&mut state, history).await;

        let client = self.clone();
        state.track(tokio::spawn(async move {
            client.pump_push_messages(plant_id, rx).await;
        }));
        info!("[Chat] ✅ 推送模式已启动 (plantId={})", plant_id);
        Ok(Ok(state.mode))
    }

    /// 轮询模式：渲染一次全量历史，然后按固定间隔对账
    async fn start_polling(
        &self,
        state: &mut ClientState,
        plant_id: i64,
        history: anyhow::Result<Vec<MessageResp>>,
    ) {
        self.set_mode(state, DeliveryMode::Polling).await;
        self.apply_history(state, history).await;

        let client = self.clone();
        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        state.track(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即返回，历史已经加载过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !client.poll_once(plant_id).await {
                    break;
                }
            }
        }));
        info!(
            "[Chat] 🔁 轮询模式已启动 (plantId={}, 间隔={:?}, 水位线={})",
            plant_id,
            period,
            state.ledger.watermark()
        );
    }

    async fn set_mode(&self, state: &mut ClientState, mode: DeliveryMode) {
        if state.mode != mode {
            state.mode = mode;
            self.listener.on_delivery_mode_changed(mode).await;
        }
    }

    /// 渲染全量历史中未渲染过的消息；加载失败只记录日志
    async fn apply_history(
        &self,
        state: &mut ClientState,
        history: anyhow::Result<Vec<MessageResp>>,
    ) {
        match history {
            Ok(messages) => {
                let fresh = state
                    .ledger
                    .accept_history(messages.into_iter().map(ChatMessage::from).collect());
                debug!(
                    "[Chat] 📜 历史消息加载完成: 新渲染 {} 条, 水位线={}",
                    fresh.len(),
                    state.ledger.watermark()
                );
                self.render(fresh).await;
            }
            Err(e) => {
                let e = ChatError::Fetch(e);
                error!("[Chat] ❌ 初始{}", e);
            }
        }
    }

    /// 一次轮询对账；返回 false 表示轮询应当结束
    async fn poll_once(&self, plant_id: i64) -> bool {
        let fetched = self.api.fetch_history(plant_id).await;

        let mut state = self.state.lock().await;
        if state.stopped || state.mode != DeliveryMode::Polling || state.plant_id != Some(plant_id)
        {
            return false;
        }
        match fetched {
            Ok(messages) => {
                let before = state.ledger.watermark();
                let fresh = state
                    .ledger
                    .reconcile(messages.into_iter().map(ChatMessage::from).collect());
                if !fresh.is_empty() {
                    debug!(
                        "[Chat] 📥 轮询到 {} 条新消息, 水位线 {} -> {}",
                        fresh.len(),
                        before,
                        state.ledger.watermark()
                    );
                }
                self.render(fresh).await;
            }
            Err(e) => {
                let e = ChatError::Fetch(e);
                warn!("[Chat] 轮询跳过: {}", e);
            }
        }
        true
    }

    /// 分发订阅推送，通道断开后降级为轮询
    async fn pump_push_messages(&self, plant_id: i64, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(body) = rx.recv().await {
            let resp = match serde_json::from_str::<MessageResp>(&body) {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("[Chat] 推送消息解析失败: {}, 原始数据: {}", e, body);
                    continue;
                }
            };
            let mut state = self.state.lock().await;
            if state.stopped {
                return;
            }
            if let Some(message) = state.ledger.accept(ChatMessage::from(resp)) {
                self.render(vec![message]).await;
            }
        }
        self.on_channel_lost(plant_id).await;
    }

    /// 推送通道中途断开：等同于连接失败，切换为轮询
    async fn on_channel_lost(&self, plant_id: i64) {
        let still_active = |state: &ClientState| {
            !state.stopped
                && state.mode == DeliveryMode::Realtime
                && state.plant_id == Some(plant_id)
        };
        if !still_active(&*self.state.lock().await) {
            return;
        }
        warn!("[Chat] ⚠️ 推送通道已断开，切换为 HTTP 轮询 (plantId={})", plant_id);

        let history = self.api.fetch_history(plant_id).await;
        let mut state = self.state.lock().await;
        if !still_active(&state) {
            return;
        }
        if let Some(channel) = state.channel.take() {
            channel.close().await;
        }
        self.start_polling(&mut state, plant_id, history).await;
    }

    async fn render(&self, messages: Vec<ChatMessage>) {
        for message in messages {
            self.listener.on_render_message(message.to_rendered()).await;
        }
    }

    /// 发送消息
    ///
    /// 推送通道可用时直接发布（不做本地渲染）；否则走 HTTP，成功后立即渲染。
    /// 返回 `Err` 时调用方应保留输入内容。
    pub async fn send(&self, text: &str) -> ChatResult<SendOutcome> {
        let content = text.trim();

        let state = self.state.lock().await;
        if state.stopped {
            return Err(ChatError::Stopped);
        }
        let Some(plant_id) = state.plant_id else {
            let err = ChatError::Validation("请先选择植物".to_string());
            self.listener.on_prompt(err.to_string()).await;
            return Err(err);
        };
        if content.is_empty() {
            let err = ChatError::Validation("请输入消息内容".to_string());
            self.listener.on_alert(err.to_string()).await;
            return Err(err);
        }

        let req = SendMessageReq::from_user(plant_id, content);

        if let Some(channel) = state.channel.clone().filter(|c| c.is_connected()) {
            let body = serde_json::to_string(&req)
                .map_err(|e| ChatError::Send(anyhow::Error::new(e)))?;
            match channel
                .publish(&destination::send_message(plant_id), body)
                .await
            {
                Ok(()) => {
                    debug!("[Chat] 📤 已发布到推送通道 (plantId={})", plant_id);
                    return Ok(SendOutcome::Published);
                }
                Err(e) => warn!("[Chat] 推送发布失败，改用 HTTP: {:#}", e),
            }
        }
        drop(state);

        let created = match self.api.create_message(&req).await {
            Ok(created) => created,
            Err(e) => {
                let err = ChatError::Send(e);
                error!("[Chat] ❌ {}", err);
                if !self.state.lock().await.stopped {
                    self.listener.on_alert(err.to_string()).await;
                }
                return Err(err);
            }
        };

        let message_id = created.message_id;
        let mut state = self.state.lock().await;
        if state.stopped {
            return Ok(SendOutcome::Delivered { message_id });
        }
        if let Some(message) = state.ledger.accept(ChatMessage::from(created)) {
            self.render(vec![message]).await;
        }

        if self.config.auto_response && state.channel.is_none() {
            let client = self.clone();
            state.track(tokio::spawn(async move {
                client.trigger_auto_reply(plant_id).await;
            }));
        }
        Ok(SendOutcome::Delivered { message_id })
    }

    async fn trigger_auto_reply(&self, plant_id: i64) {
        match self.auto_reply.request_reply(plant_id).await {
            Ok(reply) => {
                let mut state = self.state.lock().await;
                if state.stopped || state.plant_id != Some(plant_id) {
                    return;
                }
                if let Some(message) = state.ledger.accept(ChatMessage::from(reply)) {
                    self.render(vec![message]).await;
                }
            }
            Err(e) => error!("[Chat] ❌ 自动回复生成失败: {:#}", e),
        }
    }

    /// 拆除客户端：取消轮询、关闭推送通道；重复调用无副作用
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.stopped {
            return;
        }
        state.stopped = true;
        state.teardown().await;
        info!("[Chat] 👋 聊天客户端已停止");
    }
}
