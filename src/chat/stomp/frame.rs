//! STOMP 1.2 帧编解码
//!
//! 帧格式：`COMMAND\nheader:value\n...\n\nbody\0`。
//! 除 CONNECT / CONNECTED 外，头部的 `\\`、`\n`、`\r`、`:` 需要转义。

use anyhow::{anyhow, bail, Result};

/// STOMP 命令
pub mod command {
    pub const CONNECT: &str = "CONNECT";
    pub const CONNECTED: &str = "CONNECTED";
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    pub const SEND: &str = "SEND";
    pub const MESSAGE: &str = "MESSAGE";
    pub const RECEIPT: &str = "RECEIPT";
    pub const ERROR: &str = "ERROR";
    pub const DISCONNECT: &str = "DISCONNECT";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// 重复头部以第一次出现的为准
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str) -> Self {
        Self::new(command::CONNECT)
            .with_header("accept-version", "1.1,1.2")
            .with_header("host", host)
            .with_header("heart-beat", "0,0")
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(command::SUBSCRIBE)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn send_json(destination: &str, body: String) -> Self {
        Self::new(command::SEND)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Self::new(command::DISCONNECT).with_header("receipt", receipt)
    }

    fn escapes_headers(command: &str) -> bool {
        command != command::CONNECT && command != command::CONNECTED
    }

    pub fn encode(&self) -> String {
        let escape = Self::escapes_headers(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// 解码一个 WebSocket 文本消息中的帧；只有换行的消息是心跳，返回 `None`
    pub fn decode(text: &str) -> Result<Option<StompFrame>> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (command, mut rest) =
            split_line(text).ok_or_else(|| anyhow!("帧不完整: 缺少命令行"))?;
        if command.is_empty() {
            bail!("帧不完整: 命令为空");
        }
        let escape = Self::escapes_headers(command);

        let mut headers = Vec::new();
        loop {
            let (line, next) = split_line(rest).ok_or_else(|| anyhow!("帧不完整: 缺少头部结束空行"))?;
            rest = next;
            if line.is_empty() {
                break;
            }
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| anyhow!("非法头部: {}", line))?;
            if escape {
                headers.push((unescape_header(k)?, unescape_header(v)?));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        let mut frame = StompFrame {
            command: command.to_string(),
            headers,
            body: String::new(),
        };

        let body = match frame.header("content-length") {
            Some(len) => {
                let len: usize = len
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("非法 content-length: {}", len))?;
                let body = rest
                    .get(..len)
                    .ok_or_else(|| anyhow!("帧体长度不足: 期望 {} 字节", len))?;
                if !rest[len..].starts_with('\0') {
                    bail!("帧体后缺少 NUL 终止符");
                }
                body
            }
            None => {
                let end = rest.find('\0').ok_or_else(|| anyhow!("帧缺少 NUL 终止符"))?;
                &rest[..end]
            }
        };
        frame.body = body.to_string();
        Ok(Some(frame))
    }
}

/// 切出一行（兼容 `\r\n`），返回 (行, 剩余部分)
fn split_line(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('\n')?;
    let line = &s[..idx];
    Some((line.strip_suffix('\r').unwrap_or(line), &s[idx + 1..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => bail!("非法转义序列: \\{}", other.map(String::from).unwrap_or_default()),
        }
    }
    Ok(out)
}
