use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use land_scout::config::{Cli, Command, ReportArgs, RunArgs};
use land_scout::delivery::{DeliveryService, OutboundMessage, TelegramMode, TelegramTransport, Transport};
use land_scout::pipeline::{LiveParsers, Pipeline};
use land_scout::report::MonitorReporter;
use land_scout::DedupStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current step...");
            on_signal.cancel();
        }
    });

    let ok = match cli.command {
        Command::Run(args) => run(args, cancel).await?,
        Command::Report(args) => report(args).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: RunArgs, cancel: CancellationToken) -> Result<bool> {
    let config = args.build_config()?;

    info!("🏞 Land Scout");
    info!("==========================================");
    info!(
        sources = ?config.sources,
        max_pages = config.max_pages,
        proxies = config.proxies.len(),
        dry_run = config.dry_run,
        "Starting run"
    );

    let store = Arc::new(DedupStore::load(config.store_path()).context("Failed to load dedup store")?);

    let delivery = match (&config.telegram, config.dry_run) {
        (Some(telegram), false) => {
            let primary = TelegramTransport::new("telegram", telegram.primary.clone(), TelegramMode::Media)?;
            let fallback = TelegramTransport::new("telegram-text", telegram.fallback.clone(), TelegramMode::TextOnly)?;
            Some(Arc::new(DeliveryService::new(
                Box::new(primary),
                Some(Box::new(fallback)),
                config.delivery.clone(),
            )
            .with_cancel(cancel.clone())))
        }
        _ => None,
    };

    let parsers = Arc::new(LiveParsers::new(config.engine, config.pacing.clone()));
    let pipeline = Pipeline::new(config, parsers, Arc::clone(&store), delivery, cancel);

    let mut all_ok = true;
    for (source, result) in pipeline.run_all().await {
        match result {
            Ok(report) => {
                println!(
                    "{}: {:?} after {} attempt(s) | fetched {} | normalized {} | new {} | delivered {} | skipped {} | failed {}",
                    source.display_name(),
                    report.status,
                    report.attempts,
                    report.fetched,
                    report.normalized,
                    report.new,
                    report.delivered,
                    report.skipped_duplicate,
                    report.failed
                );
                all_ok &= report.succeeded();
            }
            Err(e) => {
                error!(source = %source, error = %e, "Dedup store failure");
                all_ok = false;
            }
        }
    }

    store.flush().context("Failed to save dedup store")?;
    info!(path = %store.path().display(), "💾 Dedup store saved");
    Ok(all_ok)
}

async fn report(args: ReportArgs) -> Result<bool> {
    let since = Utc::now() - Duration::hours(args.since_hours);
    let summary = MonitorReporter::new(&args.data_dir).collect(since).await?;
    let text = summary.render();
    println!("{text}");

    if args.send {
        let settings = args
            .telegram
            .settings(args.admin_chat_id.as_deref())
            .context("TELEGRAM_BOT_TOKEN and a chat id are required to send the report")?;
        let transport = TelegramTransport::new("telegram-report", settings.primary, TelegramMode::TextOnly)?;
        transport
            .send(&OutboundMessage::plain("status-report", &text))
            .await
            .context("Failed to send status report")?;
        info!("Status report sent");
    }
    Ok(true)
}
