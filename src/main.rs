use anyhow::Context;
use scalpwatch::api::{BitsoClient, PushoverClient, RetryPolicy, SheetsAuth, SheetsLedger};
use scalpwatch::config::{AppConfig, LedgerSource, LoggingConfig};
use scalpwatch::execution::{
    ActionLink, CycleState, ExecutionScheduler, FixedPriceFeed, PriceFeed, Runner,
    SignalProcessor, SystemClock,
};
use scalpwatch::ledger::{CsvLedger, SignalLedger};
use scalpwatch::notify::{LogNotifier, NotificationSink};
use tokio::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = setup_logging(&config.logging);

    tracing::info!("🚀 ScalpWatch starting");

    let runner = build_runner(&config)?;

    // Ledger must be reachable at boot; later failures only skip a cycle
    if let Err(e) = runner.check_ledger().await {
        tracing::error!("Failed to connect to ledger: {}", e);
        return Err(e).context("Ledger unreachable at startup");
    }

    tracing::info!("\n📊 Configuration:");
    tracing::info!(
        "  Interval: {}s (+{}s after boundary)",
        config.schedule.interval_secs,
        config.schedule.offset_secs
    );
    tracing::info!("  Book: {}", config.feed.book);
    tracing::info!(
        "  Notifications: {}",
        if config.notify.app_token.is_some() { "Pushover" } else { "log only" }
    );
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        _ = runner.run(CycleState::default()) => {
            tracing::error!("Run loop exited");
        }
    }

    tracing::info!("👋 ScalpWatch stopped");
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

/// Log to stdout and to a file; the guard must live as long as the process
fn setup_logging(logging: &LoggingConfig) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(&logging.directory, &logging.file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

fn build_runner(config: &AppConfig) -> anyhow::Result<Runner> {
    let scheduler = ExecutionScheduler::new(config.schedule.interval_secs, config.schedule.offset_secs);

    let processor = SignalProcessor::new(
        ActionLink {
            url: config.notify.deep_link.clone(),
            label: config.notify.deep_link_label.clone(),
        },
        config.notify.trade_log_url.clone(),
    );

    Ok(Runner::new(
        create_ledger(config),
        create_feed(config)?,
        create_sink(config),
        Box::new(SystemClock),
        processor,
        scheduler,
        config.notify.user_key.clone(),
        Duration::from_secs(config.schedule.max_sleep_slice_secs),
    ))
}

fn create_ledger(config: &AppConfig) -> Box<dyn SignalLedger> {
    let ledger = &config.ledger;

    match ledger.source {
        LedgerSource::Csv => {
            tracing::info!("Using CSV ledger at {}", ledger.csv_path);
            Box::new(CsvLedger::new(&ledger.csv_path))
        }
        LedgerSource::Sheets => {
            let auth = match (&ledger.access_token, &ledger.api_key) {
                (Some(token), _) => SheetsAuth::BearerToken(token.clone()),
                (None, Some(key)) => SheetsAuth::ApiKey(key.clone()),
                (None, None) => {
                    tracing::warn!("No Sheets credentials configured, sheet must be public");
                    SheetsAuth::None
                }
            };
            Box::new(SheetsLedger::with_base_url(
                &ledger.base_url,
                &ledger.spreadsheet_id,
                &ledger.range,
                auth,
            ))
        }
    }
}

fn create_feed(config: &AppConfig) -> anyhow::Result<Box<dyn PriceFeed>> {
    if let Some(price) = config.fixed_price()? {
        tracing::warn!("Using fixed price ${:.2} instead of the live feed", price);
        return Ok(Box::new(FixedPriceFeed::new(price)));
    }

    let policy = RetryPolicy {
        max_retries: config.feed.max_retries,
        retry_delay: Duration::from_secs(config.feed.retry_delay_secs),
        timeout: Duration::from_secs(config.feed.timeout_secs),
    };

    Ok(Box::new(BitsoClient::with_options(
        &config.feed.base_url,
        &config.feed.book,
        policy,
    )))
}

fn create_sink(config: &AppConfig) -> Box<dyn NotificationSink> {
    match &config.notify.app_token {
        Some(token) => {
            tracing::info!("Initialized Pushover client");
            Box::new(PushoverClient::with_base_url(
                &config.notify.base_url,
                token.clone(),
            ))
        }
        None => {
            tracing::warn!("No Pushover token configured, notifications will only be logged");
            Box::new(LogNotifier)
        }
    }
}
