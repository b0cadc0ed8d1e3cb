//! Telegram MarkdownV2 rendering of a listing.

use crate::delivery::hashtags;
use crate::models::{Listing, SQM_PER_HECTARE};
use rust_decimal::{Decimal, RoundingStrategy};

/// Telegram's limit for photo captions
pub const CAPTION_LIMIT: usize = 1024;
/// Telegram's limit for text messages
pub const TEXT_LIMIT: usize = 4096;

const TITLE_MAX_CHARS: usize = 200;
const MARKDOWN_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

/// A rendered listing ready for any transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub listing_id: String,
    /// Full MarkdownV2 body, at most `TEXT_LIMIT` characters
    pub text: String,
    /// MarkdownV2 body cut to fit `CAPTION_LIMIT`
    pub caption: String,
    pub photos: Vec<String>,
}

impl OutboundMessage {
    /// A plain text message, e.g. a status report. `text` is escaped here.
    pub fn plain(id: impl Into<String>, text: &str) -> Self {
        let escaped = truncate_escaped(text, TEXT_LIMIT);
        Self {
            listing_id: id.into(),
            caption: truncate_escaped(text, CAPTION_LIMIT),
            text: escaped,
            photos: Vec::new(),
        }
    }
}

/// Escape every MarkdownV2 reserved character
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if MARKDOWN_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inside `(...)` of an inline link only `)` and `\` are reserved
fn escape_link_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

/// Escape `text`, keeping as many leading characters as fit in `limit`
fn truncate_escaped(text: &str, limit: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    let total: usize = text.chars().map(escaped_width).sum();
    if total <= limit {
        return escape_markdown(text);
    }
    // Reserve one character for the ellipsis
    for c in text.chars() {
        let width = escaped_width(c);
        if used + width > limit.saturating_sub(1) {
            break;
        }
        if MARKDOWN_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
        used += width;
    }
    out.push('…');
    out
}

fn escaped_width(c: char) -> usize {
    if MARKDOWN_SPECIAL.contains(&c) {
        2
    } else {
        1
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// `45000.5` becomes `45.000,50`; whole amounts drop the decimals
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let whole = rounded.trunc();
    let cents = ((rounded - whole) * Decimal::from(100)).abs().trunc();

    let digits = whole.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if rounded.is_sign_negative() && !rounded.is_zero() {
        grouped.insert(0, '-');
    }
    if cents.is_zero() {
        grouped
    } else {
        format!("{grouped},{:0>2}", cents.to_string())
    }
}

/// Render `listing` as MarkdownV2 with at most `max_images` photos
pub fn render(listing: &Listing, max_images: usize) -> OutboundMessage {
    let head = head_lines(listing).join("\n");
    let tail = tail_lines(listing).join("\n");
    let description = listing
        .raw_attributes
        .get("description")
        .map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|d| !d.is_empty());

    OutboundMessage {
        listing_id: listing.id.clone(),
        text: compose(&head, description.as_deref(), &tail, TEXT_LIMIT),
        caption: compose(&head, description.as_deref(), &tail, CAPTION_LIMIT),
        photos: listing.image_urls.iter().take(max_images).cloned().collect(),
    }
}

fn head_lines(listing: &Listing) -> Vec<String> {
    let title: String = listing.title.chars().take(TITLE_MAX_CHARS).collect();
    let currency = listing.price.currency.code();
    let mut lines = vec![
        format!("*🏞 {}*", escape_markdown(&title)),
        String::new(),
        format!(
            "💰 *Precio:* {}",
            escape_markdown(&format!("{currency} {}", format_amount(listing.price.amount)))
        ),
    ];

    let sqm = format_amount(listing.area.value);
    let area = if listing.area.value >= Decimal::from(SQM_PER_HECTARE) {
        format!("{sqm} m² ({} ha)", format_amount(listing.area.hectares()))
    } else {
        format!("{sqm} m²")
    };
    lines.push(format!("📐 *Superficie:* {}", escape_markdown(&area)));

    if let Some(per_sqm) = listing.price_per_sqm() {
        lines.push(format!(
            "📊 *Precio por m²:* {}",
            escape_markdown(&format!("{currency} {}", format_amount(per_sqm)))
        ));
    }
    if !listing.location.is_empty() {
        lines.push(format!("📍 *Ubicación:* {}", escape_markdown(&listing.location)));
    }
    lines
}

fn tail_lines(listing: &Listing) -> Vec<String> {
    vec![
        format!("🔗 [Ver anuncio]({})", escape_link_url(&listing.url)),
        format!("🌐 Fuente: {}", escape_markdown(listing.source.display_name())),
        String::new(),
        escape_markdown(&hashtags::generate(listing).join(" ")),
    ]
}

/// Join head, description and tail; the description absorbs any overflow
fn compose(head: &str, description: Option<&str>, tail: &str, limit: usize) -> String {
    let skeleton = char_len(head) + char_len(tail) + 2;
    let full = match description {
        Some(d) => format!("{head}\n\n{}\n\n{tail}", escape_markdown(d)),
        None => format!("{head}\n\n{tail}"),
    };
    if char_len(&full) <= limit {
        return full;
    }

    // Two more separators when the description stays
    let budget = limit.saturating_sub(skeleton + 2);
    match description {
        Some(d) if budget >= 40 => format!("{head}\n\n{}\n\n{tail}", truncate_escaped(d, budget)),
        _ if skeleton <= limit => format!("{head}\n\n{tail}"),
        // Only a pathological head/tail gets here; keep the head
        _ => head.chars().take(limit).collect::<String>().trim_end_matches('\\').to_string(),
    }
}
