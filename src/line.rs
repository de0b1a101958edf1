//! LINE Messaging API boundary: webhook parsing, signature check and replies.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const LINE_API_BASE: &str = "https://api.line.me";
pub const SIGNATURE_HEADER: &str = "x-line-signature";
pub const DEFAULT_MENTION_NAME: &str = "あだT";
/// LINE rejects text messages longer than this (in characters).
pub const MESSAGE_LENGTH_MAX: usize = 5000;

type HmacSha256 = Hmac<Sha256>;

/// `signature` is the base64 HMAC-SHA256 of the raw body keyed by the channel secret.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    User,
    Group,
    Room,
}

/// A text message the relay should consider answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// User, group or room id depending on where the message was posted.
    pub participant_id: String,
    pub source: SourceKind,
    pub reply_token: String,
    pub text: String,
}

impl InboundMessage {
    /// In groups and rooms the bot only speaks when called by name.
    pub fn addressed_to(&self, mention_name: &str) -> bool {
        match self.source {
            SourceKind::User => true,
            SourceKind::Group | SourceKind::Room => self.text.contains(mention_name),
        }
    }

    fn from_event(event: RawEvent) -> Option<Self> {
        if event.kind != "message" {
            return None;
        }
        let message = event.message?;
        if message.kind != "text" {
            return None;
        }
        let source = event.source?;
        let (kind, id) = match source.kind.as_str() {
            "user" => (SourceKind::User, source.user_id),
            "group" => (SourceKind::Group, source.group_id),
            "room" => (SourceKind::Room, source.room_id),
            _ => return None,
        };
        let participant_id = id.filter(|s| !s.is_empty())?;
        let reply_token = event.reply_token.filter(|s| !s.is_empty())?;

        Some(Self {
            participant_id,
            source: kind,
            reply_token,
            text: message.text.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    reply_token: Option<String>,
    source: Option<RawSource>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSource {
    #[serde(rename = "type")]
    kind: String,
    user_id: Option<String>,
    group_id: Option<String>,
    room_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Text message events from a webhook body; everything else is dropped.
pub fn parse_events(body: &[u8]) -> anyhow::Result<Vec<InboundMessage>> {
    let parsed: WebhookBody = serde_json::from_slice(body)?;
    Ok(parsed
        .events
        .into_iter()
        .filter_map(InboundMessage::from_event)
        .collect())
}

#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn reply(&self, reply_token: &str, text: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<TextMessage>,
}

#[derive(Debug, Serialize)]
struct TextMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

pub struct LineClient {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
}

impl LineClient {
    pub fn new(access_token: String, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
            base_url: base_url
                .unwrap_or_else(|| LINE_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait]
impl ReplyChannel for LineClient {
    async fn reply(&self, reply_token: &str, text: &str) -> anyhow::Result<()> {
        let request = ReplyRequest {
            reply_token,
            messages: vec![TextMessage {
                kind: "text",
                text: clip(text, MESSAGE_LENGTH_MAX),
            }],
        };

        let response = self
            .http
            .post(format!("{}/v2/bot/message/reply", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE reply failed: HTTP {}: {}", status, body);
        }
        Ok(())
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
