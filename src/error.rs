//! Typed errors for each pipeline stage.
//!
//! Per-listing errors (`NormalizationError`, `DeliveryError`) never abort a
//! batch. `ParseError` escalates to the retry orchestrator. `StoreError` is
//! fatal for the whole run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while fetching or extracting a source page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Network timeout, connection failure or server error
    #[error("transient fetch failure for {url}: {reason}")]
    Transient { url: String, reason: String },

    /// The source answered with an anti-bot challenge instead of content
    #[error("blocked by {source_name} at {url}: {marker}")]
    Blocked {
        source_name: String,
        url: String,
        marker: String,
    },

    /// Expected content markers are missing from the page
    #[error("page structure not recognised at {url}: {reason}")]
    Structure { url: String, reason: String },
}

impl ParseError {
    /// Whether the orchestrator should back off and try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, ParseError::Transient { .. } | ParseError::Blocked { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::Transient { .. } => ErrorKind::TransientFetch,
            ParseError::Blocked { .. } => ErrorKind::Blocked,
            ParseError::Structure { .. } => ErrorKind::ParseStructure,
        }
    }
}

/// Raw text that could not be turned into canonical fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("price is missing")]
    MissingPrice,

    #[error("area is missing")]
    MissingArea,

    #[error("unparsable price '{0}'")]
    UnparsablePrice(String),

    #[error("unparsable area '{0}'")]
    UnparsableArea(String),

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),
}

/// Failures posting to the output channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("server error: HTTP {0}")]
    Server(u16),

    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// The channel could not fetch or accept the attached photos
    #[error("media rejected: {0}")]
    MediaRejected(String),

    #[error("rejected by channel: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// The run was cancelled before the message went out
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Failures that warrant trying the fallback transport
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::Timeout
                | DeliveryError::Network(_)
                | DeliveryError::Server(_)
                | DeliveryError::RateLimited { .. }
                | DeliveryError::MediaRejected(_)
        )
    }
}

/// Failures of the persisted dedup store. Always fatal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dedup store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dedup store at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("could not lock dedup store at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Classification used in attempt log artifacts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientFetch,
    Blocked,
    ParseStructure,
    Normalization,
    Delivery,
    Store,
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_parse_errors() {
        let transient = ParseError::Transient {
            url: "u".into(),
            reason: "timeout".into(),
        };
        let blocked = ParseError::Blocked {
            source_name: "gallito".into(),
            url: "u".into(),
            marker: "captcha".into(),
        };
        let structure = ParseError::Structure {
            url: "u".into(),
            reason: "no cards".into(),
        };
        assert!(transient.is_retryable());
        assert!(blocked.is_retryable());
        assert!(!structure.is_retryable());
        assert_eq!(structure.kind(), ErrorKind::ParseStructure);
    }

    #[test]
    fn delivery_fallback_policy() {
        assert!(DeliveryError::Timeout.is_transient());
        assert!(DeliveryError::Server(502).is_transient());
        assert!(DeliveryError::RateLimited { retry_after: Some(3) }.is_transient());
        assert!(!DeliveryError::Rejected("chat not found".into()).is_transient());
        assert!(!DeliveryError::Malformed("eof".into()).is_transient());
        assert!(!DeliveryError::Cancelled.is_transient());
    }
}
