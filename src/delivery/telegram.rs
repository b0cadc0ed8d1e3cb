use crate::delivery::format::OutboundMessage;
use crate::delivery::Transport;
use crate::error::DeliveryError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MEDIA_GROUP_MAX: usize = 10;

/// Telegram replies that mean the photos, not the message, were refused
const MEDIA_ERROR_MARKERS: &[&str] = &[
    "wrong file identifier",
    "failed to get http url content",
    "wrong type of the web page content",
    "image_process_failed",
    "photo_invalid_dimensions",
    "webpage_media_empty",
    "wrong remote file",
    "group send failed",
];

/// Bot credentials and target chat
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub token: String,
    pub chat_id: String,
}

/// What a transport is allowed to post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelegramMode {
    /// Photos with a caption when the listing has images, else text
    Media,
    /// Always a single text message
    TextOnly,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Bot API transport
pub struct TelegramTransport {
    name: &'static str,
    client: Client,
    config: TelegramConfig,
    mode: TelegramMode,
}

impl TelegramTransport {
    pub fn new(name: &'static str, config: TelegramConfig, mode: TelegramMode) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        Ok(Self {
            name,
            client,
            config,
            mode,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.api_base.trim_end_matches('/'),
            self.config.token
        )
    }

    /// Method name and JSON payload for `message` under this transport's mode
    fn request_for(&self, message: &OutboundMessage) -> (&'static str, Value) {
        let chat_id = &self.config.chat_id;
        let photos: &[String] = match self.mode {
            TelegramMode::Media => &message.photos[..message.photos.len().min(MEDIA_GROUP_MAX)],
            TelegramMode::TextOnly => &[],
        };

        match photos {
            [] => (
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": message.text,
                    "parse_mode": "MarkdownV2",
                }),
            ),
            [photo] => (
                "sendPhoto",
                json!({
                    "chat_id": chat_id,
                    "photo": photo,
                    "caption": message.caption,
                    "parse_mode": "MarkdownV2",
                }),
            ),
            many => {
                let media: Vec<Value> = many
                    .iter()
                    .enumerate()
                    .map(|(i, url)| {
                        if i == 0 {
                            json!({
                                "type": "photo",
                                "media": url,
                                "caption": message.caption,
                                "parse_mode": "MarkdownV2",
                            })
                        } else {
                            json!({ "type": "photo", "media": url })
                        }
                    })
                    .collect();
                (
                    "sendMediaGroup",
                    json!({
                        "chat_id": chat_id,
                        "media": media,
                    }),
                )
            }
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let (method, payload) = self.request_for(message);
        debug!(transport = self.name, method, listing_id = %message.listing_id, "Posting to Telegram");

        let response = self
            .client
            .post(self.endpoint(method))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    // reqwest errors can embed the URL, which carries the bot token
                    DeliveryError::Network(e.without_url().to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout
            } else {
                DeliveryError::Network(e.without_url().to_string())
            }
        })?;

        classify_response(status, &body)
    }
}

/// Map a Bot API reply to success or a typed delivery failure
pub fn classify_response(status: u16, body: &str) -> Result<(), DeliveryError> {
    let parsed: ApiResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if status >= 500 => return Err(DeliveryError::Server(status)),
        Err(_) if status == 429 => return Err(DeliveryError::RateLimited { retry_after: None }),
        Err(e) => return Err(DeliveryError::Malformed(format!("HTTP {status}: {e}"))),
    };

    if parsed.ok {
        return Ok(());
    }

    let retry_after = parsed.parameters.and_then(|p| p.retry_after);
    if retry_after.is_some() || status == 429 || parsed.error_code == Some(429) {
        return Err(DeliveryError::RateLimited { retry_after });
    }
    if status >= 500 || parsed.error_code.is_some_and(|c| c >= 500) {
        return Err(DeliveryError::Server(parsed.error_code.unwrap_or(status)));
    }

    let description = parsed
        .description
        .unwrap_or_else(|| format!("HTTP {status}"));
    let lower = description.to_lowercase();
    if MEDIA_ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
        Err(DeliveryError::MediaRejected(description))
    } else {
        Err(DeliveryError::Rejected(description))
    }
}
