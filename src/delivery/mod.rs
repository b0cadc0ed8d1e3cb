//! Posting listings to the output channel.
//!
//! `DeliveryService` tries the primary transport, falls back to the
//! secondary one on transient failures, and spaces out successful posts.
//! It never touches the dedup store: the caller marks a listing posted
//! only after a successful `DeliveryResult`.

pub mod format;
pub mod hashtags;
pub mod telegram;

pub use format::OutboundMessage;
pub use telegram::{TelegramConfig, TelegramMode, TelegramTransport};

use crate::error::DeliveryError;
use crate::models::Listing;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A way of posting one rendered message
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportRole {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub success: bool,
    pub transport_used: Option<TransportRole>,
    /// Last failure seen, when `success` is false
    pub error: Option<DeliveryError>,
}

impl DeliveryResult {
    fn delivered(role: TransportRole) -> Self {
        Self {
            success: true,
            transport_used: Some(role),
            error: None,
        }
    }

    fn failed(role: TransportRole, error: DeliveryError) -> Self {
        Self {
            success: false,
            transport_used: Some(role),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Minimum spacing between consecutive successful posts
    pub min_interval: Duration,
    pub max_images: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(3),
            max_images: 5,
        }
    }
}

#[derive(Debug, Default)]
struct Gate {
    last_success: Option<Instant>,
    /// Set from a rate-limit `retry_after` hint
    not_before: Option<Instant>,
}

impl Gate {
    fn ready_at(&self, min_interval: Duration) -> Option<Instant> {
        let spaced = self.last_success.map(|t| t + min_interval);
        match (spaced, self.not_before) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn note_failure(&mut self, error: &DeliveryError) {
        if let DeliveryError::RateLimited {
            retry_after: Some(secs),
        } = error
        {
            let until = Instant::now() + Duration::from_secs(*secs);
            self.not_before = Some(self.not_before.map_or(until, |t| t.max(until)));
        }
    }
}

pub struct DeliveryService {
    primary: Box<dyn Transport>,
    fallback: Option<Box<dyn Transport>>,
    config: DeliveryConfig,
    gate: Mutex<Gate>,
    cancel: CancellationToken,
}

impl DeliveryService {
    pub fn new(primary: Box<dyn Transport>, fallback: Option<Box<dyn Transport>>, config: DeliveryConfig) -> Self {
        Self {
            primary,
            fallback,
            config,
            gate: Mutex::new(Gate::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon pending spacing or rate-limit waits when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Post one listing. Calls are serialized; each waits for the
    /// configured spacing after the previous success.
    pub async fn deliver(&self, listing: &Listing) -> DeliveryResult {
        let message = format::render(listing, self.config.max_images);
        self.deliver_message(&message).await
    }

    pub async fn deliver_message(&self, message: &OutboundMessage) -> DeliveryResult {
        let mut gate = self.gate.lock().await;
        if let Some(ready_at) = gate.ready_at(self.config.min_interval) {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!(listing_id = %message.listing_id, "Delivery cancelled while waiting to send");
                    return DeliveryResult {
                        success: false,
                        transport_used: None,
                        error: Some(DeliveryError::Cancelled),
                    };
                }
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }

        let result = self.try_transports(message, &mut gate).await;
        if result.success {
            gate.last_success = Some(Instant::now());
        }
        result
    }

    async fn try_transports(&self, message: &OutboundMessage, gate: &mut Gate) -> DeliveryResult {
        let primary_error = match self.primary.send(message).await {
            Ok(()) => {
                info!(listing_id = %message.listing_id, transport = self.primary.name(), "Listing delivered");
                return DeliveryResult::delivered(TransportRole::Primary);
            }
            Err(e) => e,
        };
        gate.note_failure(&primary_error);

        let fallback = match &self.fallback {
            Some(fallback) if primary_error.is_transient() => fallback,
            _ => {
                warn!(listing_id = %message.listing_id, transport = self.primary.name(), error = %primary_error, "Delivery failed");
                return DeliveryResult::failed(TransportRole::Primary, primary_error);
            }
        };

        warn!(
            listing_id = %message.listing_id,
            transport = self.primary.name(),
            error = %primary_error,
            fallback = fallback.name(),
            "Primary transport failed, trying fallback"
        );
        match fallback.send(message).await {
            Ok(()) => {
                info!(listing_id = %message.listing_id, transport = fallback.name(), "Listing delivered via fallback");
                DeliveryResult::delivered(TransportRole::Fallback)
            }
            Err(e) => {
                gate.note_failure(&e);
                warn!(listing_id = %message.listing_id, transport = fallback.name(), error = %e, "Fallback delivery failed");
                DeliveryResult::failed(TransportRole::Fallback, e)
            }
        }
    }
}
