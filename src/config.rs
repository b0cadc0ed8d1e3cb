//! Command line and environment configuration.
//!
//! Flags fall back to environment variables, which a `.env` file may set.
//! Everything is converted into plain typed structs before use.

use crate::delivery::telegram::DEFAULT_API_BASE;
use crate::delivery::{DeliveryConfig, TelegramConfig};
use crate::models::Source;
use crate::orchestrator::{ProxyRotation, RetryPolicy};
use crate::scrapers::{FetchEngine, PacingConfig, SearchParams};
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug, Clone)]
#[command(name = "land-scout", version, about = "Harvests Uruguayan land listings and posts new ones to Telegram")]
pub struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true, env = "LAND_SCOUT_VERBOSE")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scrape sources and deliver new listings
    Run(RunArgs),
    /// Summarize recent run artifacts
    Report(ReportArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceArg {
    Mercadolibre,
    Infocasas,
    Gallito,
    All,
}

impl SourceArg {
    pub fn sources(self) -> Vec<Source> {
        match self {
            SourceArg::Mercadolibre => vec![Source::MercadoLibre],
            SourceArg::Infocasas => vec![Source::InfoCasas],
            SourceArg::Gallito => vec![Source::Gallito],
            SourceArg::All => Source::ALL.to_vec(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Which site to scrape
    #[arg(long, env = "LAND_SCOUT_SOURCE", value_enum, default_value = "all")]
    pub source: SourceArg,

    /// Result pages per source
    #[arg(long, env = "MAX_PAGES_TO_PARSE", default_value_t = 1)]
    pub max_pages: u32,

    /// Run Chrome without a window (browser engine only)
    #[arg(long, env = "HEADLESS_MODE", default_value_t = true, action = ArgAction::Set)]
    pub headless: bool,

    /// Fetch pages with headless Chrome instead of plain HTTP
    #[arg(long, env = "LAND_SCOUT_BROWSER")]
    pub browser: bool,

    /// Visit every listing's detail page
    #[arg(long, env = "LAND_SCOUT_FETCH_DETAILS")]
    pub fetch_details: bool,

    /// Department to narrow the search, e.g. "rocha"
    #[arg(long, env = "LAND_SCOUT_DEPARTMENT")]
    pub department: Option<String>,

    /// Skip listings asking more than this
    #[arg(long, env = "LAND_SCOUT_MAX_PRICE")]
    pub max_price: Option<Decimal>,

    /// Skip listings smaller than this many square meters
    #[arg(long, env = "LAND_SCOUT_MIN_AREA_SQM")]
    pub min_area_sqm: Option<Decimal>,

    /// Total attempts per source
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Backoff after the first failed attempt; doubles each time
    #[arg(long, env = "RETRY_DELAY_SECS", default_value_t = 5)]
    pub retry_delay_secs: u64,

    #[arg(long, env = "MAX_RETRY_DELAY_SECS", default_value_t = 60)]
    pub max_retry_delay_secs: u64,

    /// Move to the next proxy after each failed attempt
    #[arg(long, env = "ROTATE_PROXIES")]
    pub rotate_proxies: bool,

    /// Proxy URLs, comma separated
    #[arg(long, env = "PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,

    /// File with one proxy URL per line
    #[arg(long, env = "PROXY_FILE")]
    pub proxy_file: Option<PathBuf>,

    #[arg(long, env = "REQUEST_DELAY_MIN_MS", default_value_t = 3000)]
    pub request_delay_min_ms: u64,

    #[arg(long, env = "REQUEST_DELAY_MAX_MS", default_value_t = 8000)]
    pub request_delay_max_ms: u64,

    /// Minimum spacing between posted listings
    #[arg(long, env = "TELEGRAM_DELAY_SECONDS", default_value_t = 3)]
    pub delivery_interval_secs: u64,

    /// Photos attached per listing
    #[arg(long, env = "MAX_IMAGES", default_value_t = 5)]
    pub max_images: usize,

    #[command(flatten)]
    pub telegram: TelegramArgs,

    /// Holds seen_listings.json, results/ and logs/
    #[arg(long, env = "LAND_SCOUT_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Do everything except deliver and mark listings posted
    #[arg(long, env = "LAND_SCOUT_DRY_RUN")]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TelegramArgs {
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,

    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Bot token for the text-only fallback (defaults to the main token)
    #[arg(long, env = "TELEGRAM_FALLBACK_BOT_TOKEN", hide_env_values = true)]
    pub fallback_telegram_token: Option<String>,

    #[arg(long, env = "TELEGRAM_API_BASE", default_value = DEFAULT_API_BASE)]
    pub telegram_api_base: String,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[arg(long, env = "LAND_SCOUT_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Only artifacts from the last N hours
    #[arg(long, default_value_t = 24)]
    pub since_hours: i64,

    /// Send the summary to Telegram instead of printing only
    #[arg(long)]
    pub send: bool,

    /// Chat for the summary (defaults to the listing channel)
    #[arg(long, env = "TELEGRAM_ADMIN_ID")]
    pub admin_chat_id: Option<String>,

    #[command(flatten)]
    pub telegram: TelegramArgs,
}

/// Primary and fallback bot settings
#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub primary: TelegramConfig,
    pub fallback: TelegramConfig,
}

impl TelegramArgs {
    /// Resolved settings, or `None` when token or chat id is missing
    pub fn settings(&self, chat_override: Option<&str>) -> Option<TelegramSettings> {
        let token = self.telegram_token.clone().filter(|t| !t.trim().is_empty())?;
        let chat_id = chat_override
            .map(str::to_string)
            .or_else(|| self.telegram_chat_id.clone())
            .filter(|c| !c.trim().is_empty())?;

        let primary = TelegramConfig {
            api_base: self.telegram_api_base.clone(),
            token: token.clone(),
            chat_id,
        };
        let fallback = TelegramConfig {
            token: self
                .fallback_telegram_token
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(token),
            ..primary.clone()
        };
        Some(TelegramSettings { primary, fallback })
    }
}

/// Everything one `run` needs
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub sources: Vec<Source>,
    pub search: SearchParams,
    pub max_pages: u32,
    pub fetch_details: bool,
    pub engine: FetchEngine,
    pub pacing: PacingConfig,
    pub retry: RetryPolicy,
    pub proxies: ProxyRotation,
    pub delivery: DeliveryConfig,
    pub telegram: Option<TelegramSettings>,
    pub data_dir: PathBuf,
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sources: Source::ALL.to_vec(),
            search: SearchParams::default(),
            max_pages: 1,
            fetch_details: false,
            engine: FetchEngine::Http { timeout: HTTP_TIMEOUT },
            pacing: PacingConfig::default(),
            retry: RetryPolicy::default(),
            proxies: ProxyRotation::direct(),
            delivery: DeliveryConfig::default(),
            telegram: None,
            data_dir: PathBuf::from("./data"),
            dry_run: false,
        }
    }
}

impl RunConfig {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("seen_listings.json")
    }
}

impl RunArgs {
    pub fn build_config(&self) -> Result<RunConfig> {
        if self.max_pages == 0 {
            bail!("--max-pages must be at least 1");
        }
        if self.request_delay_min_ms > self.request_delay_max_ms {
            bail!("--request-delay-min-ms must not exceed --request-delay-max-ms");
        }

        let telegram = self.telegram.settings(None);
        if telegram.is_none() && !self.dry_run {
            bail!("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID are required unless --dry-run is set");
        }

        let mut proxies: Vec<String> = self.proxies.iter().filter_map(|p| normalize_proxy(p)).collect();
        if let Some(path) = &self.proxy_file {
            proxies.extend(load_proxy_file(path)?);
        }
        let mut seen = HashSet::new();
        proxies.retain(|p| seen.insert(p.clone()));

        let engine = if self.browser {
            FetchEngine::Browser { headless: self.headless }
        } else {
            FetchEngine::Http { timeout: HTTP_TIMEOUT }
        };

        Ok(RunConfig {
            sources: self.source.sources(),
            search: SearchParams {
                department: self.department.clone(),
                max_price: self.max_price,
                min_area_sqm: self.min_area_sqm,
            },
            max_pages: self.max_pages,
            fetch_details: self.fetch_details,
            engine,
            pacing: PacingConfig {
                min_delay: Duration::from_millis(self.request_delay_min_ms),
                max_delay: Duration::from_millis(self.request_delay_max_ms),
                ..PacingConfig::default()
            },
            retry: RetryPolicy {
                max_attempts: self.max_retries.max(1),
                base_delay: Duration::from_secs(self.retry_delay_secs),
                max_delay: Duration::from_secs(self.max_retry_delay_secs.max(self.retry_delay_secs)),
                jitter: true,
            },
            proxies: ProxyRotation::new(proxies, self.rotate_proxies),
            delivery: DeliveryConfig {
                min_interval: Duration::from_secs(self.delivery_interval_secs),
                max_images: self.max_images,
            },
            telegram,
            data_dir: self.data_dir.clone(),
            dry_run: self.dry_run,
        })
    }
}

/// Bare `host:port` entries get an `http://` scheme
fn normalize_proxy(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if line.contains("://") {
        Some(line.to_string())
    } else {
        Some(format!("http://{line}"))
    }
}

fn load_proxy_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read proxy file {}", path.display()))?;
    Ok(text.lines().filter_map(normalize_proxy).collect())
}
