//! Anti-bot challenge and block page detection.

use crate::error::{ParseError, ParseResult};
use crate::models::Source;
use crate::scrapers::types::FetchedPage;
use tracing::warn;

const CHALLENGE_MARKERS: &[&str] = &[
    "g-recaptcha",
    "iframe src=\"https://www.google.com/recaptcha",
    "cf-challenge",
    "challenge-running",
    "cf-browser-verification",
    "checking your browser",
    "verifying you are human",
    "no soy un robot",
    "are you a robot",
    "verifica que eres humano",
    "access denied",
    "acceso denegado",
    "unusual traffic",
    "tráfico inusual",
    "too many requests",
    "ip has been blocked",
    "has been temporarily limited",
];

/// Return the first challenge marker found in the page, if any
pub fn detect_challenge(page: &FetchedPage) -> Option<String> {
    if matches!(page.status, 403 | 429) {
        return Some(format!("HTTP {}", page.status));
    }
    let body = page.body.to_lowercase();
    CHALLENGE_MARKERS
        .iter()
        .find(|marker| body.contains(*marker))
        .map(|marker| (*marker).to_string())
}

/// Reject challenge pages and non-success responses
pub fn ensure_content(source: Source, page: &FetchedPage) -> ParseResult<()> {
    if let Some(marker) = detect_challenge(page) {
        warn!(source = %source, url = %page.url, %marker, "Challenge page detected");
        return Err(ParseError::Blocked {
            source_name: source.key().to_string(),
            url: page.url.clone(),
            marker,
        });
    }
    if !(200..300).contains(&page.status) {
        return Err(ParseError::Transient {
            url: page.url.clone(),
            reason: format!("HTTP {}", page.status),
        });
    }
    if page.body.trim().is_empty() {
        return Err(ParseError::Transient {
            url: page.url.clone(),
            reason: "empty response body".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(status: u16, body: &str) -> FetchedPage {
        FetchedPage {
            url: "https://example.com".to_string(),
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn status_codes_classify() {
        assert!(matches!(
            ensure_content(Source::Gallito, &page(429, "")),
            Err(ParseError::Blocked { .. })
        ));
        assert!(matches!(
            ensure_content(Source::Gallito, &page(503, "<html>down</html>")),
            Err(ParseError::Transient { .. })
        ));
        assert!(ensure_content(Source::Gallito, &page(200, "<html>ok</html>")).is_ok());
    }

    #[test]
    fn markers_are_case_insensitive() {
        let blocked = page(200, "<div id=\"Challenge-Running\">Checking your browser</div>");
        assert_eq!(detect_challenge(&blocked).as_deref(), Some("challenge-running"));
        let err = ensure_content(Source::MercadoLibre, &blocked).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Blocked);
    }
}
