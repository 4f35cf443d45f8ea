//! 基于 WebSocket 的 STOMP 推送通道

use super::frame::{command, StompFrame};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

type Subscriptions = Arc<std::sync::Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>;

/// 推送通道（发布/订阅）
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// 订阅目的地，返回消息体接收端；连接断开后接收端结束
    async fn subscribe(&self, destination: &str) -> Result<mpsc::UnboundedReceiver<String>>;

    /// 发布消息，不等待确认
    async fn publish(&self, destination: &str, body: String) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// 关闭通道，重复调用无副作用
    async fn close(&self);
}

/// 推送通道连接器
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn PushChannel>>;
}

/// STOMP over WebSocket 连接器
#[derive(Clone, Debug)]
pub struct StompConnector {
    ws_url: String,
    connect_timeout: Duration,
    keepalive: Duration,
}

impl StompConnector {
    pub fn new(ws_url: String, connect_timeout: Duration) -> Self {
        Self {
            ws_url,
            connect_timeout,
            keepalive: Duration::from_secs(25),
        }
    }

    /// CONNECT 帧的 host 头取自 URL
    fn host(&self) -> Result<String> {
        let url = reqwest::Url::parse(&self.ws_url)
            .with_context(|| format!("无效的 WebSocket 地址: {}", self.ws_url))?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("WebSocket 地址缺少 host: {}", self.ws_url))?;
        Ok(host.to_string())
    }

    async fn handshake(&self) -> Result<StompChannel> {
        let host = self.host()?;
        info!("[Stomp] 🔗 连接推送通道: {}", self.ws_url);

        let (ws_stream, response) = connect_async(self.ws_url.as_str())
            .await
            .context("WebSocket 连接失败")?;
        debug!("[Stomp] WebSocket 握手完成, 状态: {}", response.status());

        let (mut write, mut read) = ws_stream.split();
        write
            .send(WsMessage::Text(StompFrame::connect(&host).encode()))
            .await
            .context("发送 CONNECT 帧失败")?;

        // 等待 CONNECTED，期间忽略心跳
        loop {
            let msg = read
                .next()
                .await
                .ok_or_else(|| anyhow!("未收到 CONNECTED 帧，连接已关闭"))?
                .context("读取 CONNECTED 帧失败")?;
            let text = match msg {
                WsMessage::Text(text) => text,
                WsMessage::Binary(data) => String::from_utf8(data).context("非 UTF-8 帧")?,
                WsMessage::Close(frame) => {
                    return Err(anyhow!("握手期间连接被关闭: {:?}", frame));
                }
                _ => continue,
            };
            match StompFrame::decode(&text)? {
                None => continue,
                Some(frame) if frame.command == command::CONNECTED => {
                    info!(
                        "[Stomp] ✅ STOMP 连接成功, version={}",
                        frame.header("version").unwrap_or("1.0")
                    );
                    break;
                }
                Some(frame) if frame.command == command::ERROR => {
                    return Err(anyhow!(
                        "服务器拒绝连接: {}",
                        frame.header("message").unwrap_or(&frame.body)
                    ));
                }
                Some(frame) => {
                    return Err(anyhow!("握手期间收到意外帧: {}", frame.command));
                }
            }
        }

        Ok(StompChannel::start(write, read, self.keepalive))
    }
}

#[async_trait]
impl PushConnector for StompConnector {
    async fn connect(&self) -> Result<Arc<dyn PushChannel>> {
        let channel = tokio::time::timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| anyhow!("推送通道连接超时 ({:?})", self.connect_timeout))??;
        Ok(Arc::new(channel))
    }
}

/// 已建立的 STOMP 通道
pub struct StompChannel {
    writer: Arc<Mutex<WsWriter>>,
    subscriptions: Subscriptions,
    connected: Arc<AtomicBool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl StompChannel {
    fn start(write: WsWriter, read: WsReader, keepalive: Duration) -> Self {
        let writer = Arc::new(Mutex::new(write));
        let subscriptions: Subscriptions = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        // 保活
        let writer_for_keepalive = writer.clone();
        let keepalive_task = tokio::spawn(async move {
            let mut ticker = interval(keepalive);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut w = writer_for_keepalive.lock().await;
                if w.send(WsMessage::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        });

        let reader_task = tokio::spawn(read_loop(read, subscriptions.clone(), connected.clone()));

        Self {
            writer,
            subscriptions,
            connected,
            tasks: std::sync::Mutex::new(vec![keepalive_task, reader_task]),
        }
    }

    async fn send_frame(&self, frame: StompFrame) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.send(WsMessage::Text(frame.encode()))
            .await
            .context("写入 WebSocket 失败")?;
        Ok(())
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for StompChannel {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// 读取循环：把 MESSAGE 帧分发给对应订阅，连接结束时关闭所有订阅
async fn read_loop(mut read: WsReader, subscriptions: Subscriptions, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = read.next().await {
        let text = match msg_result {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    warn!("[Stomp] 忽略非 UTF-8 帧: {}", e);
                    continue;
                }
            },
            Ok(WsMessage::Close(frame)) => {
                warn!("[Stomp] 👋 连接关闭: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("[Stomp] WebSocket 错误: {}", e);
                break;
            }
        };

        let frame = match StompFrame::decode(&text) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                error!("[Stomp] 帧解析失败: {:#}, 原始数据: {:?}", e, text);
                continue;
            }
        };

        match frame.command.as_str() {
            command::MESSAGE => {
                let Some(sub_id) = frame.header("subscription") else {
                    warn!("[Stomp] MESSAGE 帧缺少 subscription 头");
                    continue;
                };
                let tx = subscriptions
                    .lock()
                    .ok()
                    .and_then(|subs| subs.get(sub_id).cloned());
                match tx {
                    Some(tx) => {
                        let _ = tx.send(frame.body);
                    }
                    None => debug!("[Stomp] 未知订阅: {}", sub_id),
                }
            }
            command::ERROR => {
                error!(
                    "[Stomp] ❌ 服务器错误: {}",
                    frame.header("message").unwrap_or(&frame.body)
                );
                break;
            }
            command::RECEIPT => {
                debug!("[Stomp] 收到回执: {:?}", frame.header("receipt-id"));
            }
            other => debug!("[Stomp] 忽略帧: {}", other),
        }
    }

    connected.store(false, Ordering::SeqCst);
    if let Ok(mut subs) = subscriptions.lock() {
        subs.clear();
    }
}

#[async_trait]
impl PushChannel for StompChannel {
    async fn subscribe(&self, destination: &str) -> Result<mpsc::UnboundedReceiver<String>> {
        if !self.is_connected() {
            return Err(anyhow!("推送通道未连接"));
        }
        let sub_id = format!("sub-{}", Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .map_err(|_| anyhow!("订阅表锁已损坏"))?
            .insert(sub_id.clone(), tx);

        self.send_frame(StompFrame::subscribe(&sub_id, destination))
            .await?;
        info!("[Stomp] 📥 已订阅: {} ({})", destination, sub_id);
        Ok(rx)
    }

    async fn publish(&self, destination: &str, body: String) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("推送通道未连接"));
        }
        debug!("[Stomp] 📤 发布到 {}", destination);
        self.send_frame(StompFrame::send_json(destination, body)).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let receipt = format!("disconnect-{}", Uuid::new_v4());
            if let Err(e) = self.send_frame(StompFrame::disconnect(&receipt)).await {
                debug!("[Stomp] 发送 DISCONNECT 失败: {:#}", e);
            }
            let mut w = self.writer.lock().await;
            if let Err(e) = w.close().await {
                debug!("[Stomp] 关闭 WebSocket 失败: {}", e);
            }
            info!("[Stomp] 👋 推送通道已关闭");
        }
        self.abort_tasks();
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn next_frame<S>(ws: &mut WebSocketStream<S>) -> StompFrame
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => {
                    if let Some(frame) = StompFrame::decode(&text).unwrap() {
                        return frame;
                    }
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn handshake_subscribe_and_publish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let connect = next_frame(&mut ws).await;
            assert_eq!(connect.command, command::CONNECT);
            assert_eq!(connect.header("host"), Some("127.0.0.1"));
            ws.send(WsMessage::Text(
                StompFrame::new(command::CONNECTED)
                    .with_header("version", "1.2")
                    .encode(),
            ))
            .await
            .unwrap();

            let subscribe = next_frame(&mut ws).await;
            assert_eq!(subscribe.command, command::SUBSCRIBE);
            assert_eq!(subscribe.header("destination"), Some("/topic/public/1"));
            let sub_id = subscribe.header("id").unwrap().to_string();

            // 心跳不影响分发
            ws.send(WsMessage::Text("\n".to_string())).await.unwrap();
            ws.send(WsMessage::Text(
                StompFrame::new(command::MESSAGE)
                    .with_header("destination", "/topic/public/1")
                    .with_header("subscription", sub_id)
                    .with_body(r#"{"messageId":1}"#)
                    .encode(),
            ))
            .await
            .unwrap();

            let send = next_frame(&mut ws).await;
            assert_eq!(send.command, command::SEND);
            assert_eq!(send.header("destination"), Some("/app/chat.sendMessage/1"));
            send.body
        });

        let connector = StompConnector::new(format!("ws://{}/ws/websocket", addr), Duration::from_secs(5));
        let channel = connector.connect().await.unwrap();
        assert!(channel.is_connected());

        let mut rx = channel.subscribe("/topic/public/1").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"{"messageId":1}"#);

        channel
            .publish("/app/chat.sendMessage/1", r#"{"content":"hi"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(broker.await.unwrap(), r#"{"content":"hi"}"#);

        channel.close().await;
        channel.close().await;
        assert!(!channel.is_connected());
        assert!(channel.publish("/app/x", "{}".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn error_frame_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = next_frame(&mut ws).await;
            let _ = ws
                .send(WsMessage::Text(
                    StompFrame::new(command::ERROR)
                        .with_header("message", "denied")
                        .encode(),
                ))
                .await;
        });

        let connector = StompConnector::new(format!("ws://{}/ws/websocket", addr), Duration::from_secs(5));
        let err = connector.connect().await.err().unwrap();
        assert!(format!("{:#}", err).contains("denied"));
    }

    #[tokio::test]
    async fn unreachable_broker_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = StompConnector::new(format!("ws://{}/ws/websocket", addr), Duration::from_secs(2));
        assert!(connector.connect().await.is_err());
    }
}
