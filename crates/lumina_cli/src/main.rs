//! lumina CLI: one-shot price quote, polling price watcher, effective config.

use clap::{Parser, Subcommand};
use lumina::feed::PriceError;
use lumina::{poll_callback, FeedStore, LuminaConfig, PollingLoop, PriceFetcher, QuoteCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    let config = LuminaConfig::load();
    match cli.command {
        Command::Price(args) => run_price(&config, args),
        Command::Watch(args) => run_watch(&config, args),
        Command::Config => run_config(&config),
    }
}

#[derive(Parser)]
#[command(name = "lumina")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Price feed for the Lumina protocol app, with retries, polling and fallback")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one quote (live, else cached, else fallback) and print it as JSON.
    Price(PriceArgs),
    /// Poll the price feed and print each display-state update as a JSON line.
    Watch(WatchArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Parser)]
struct PriceArgs {
    #[arg(long)]
    asset: Option<String>,
    #[arg(long)]
    vs: Option<String>,
    #[arg(long, default_value = "./data/cache")]
    cache_dir: PathBuf,
    #[arg(long)]
    offline: bool,
}

#[derive(Parser)]
struct WatchArgs {
    #[arg(long)]
    asset: Option<String>,
    #[arg(long)]
    vs: Option<String>,
    #[arg(long)]
    interval_ms: Option<u64>,
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,
    #[arg(long, default_value = "./data/cache")]
    cache_dir: PathBuf,
}

fn cache_path(cache_dir: &std::path::Path) -> PathBuf {
    cache_dir.join("quotes.sqlite")
}

fn with_pair(config: &LuminaConfig, asset: Option<String>, vs: Option<String>) -> LuminaConfig {
    let mut config = config.clone();
    if let Some(asset) = asset {
        config.price.asset = asset;
    }
    if let Some(vs) = vs {
        config.price.vs_currency = vs;
    }
    config
}

fn run_price(config: &LuminaConfig, args: PriceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = with_pair(config, args.asset, args.vs);
    let cache = QuoteCache::open(cache_path(&args.cache_dir))?;
    let fetcher = PriceFetcher::new(config.price_config(args.offline), Some(cache))?;
    let rt = tokio::runtime::Runtime::new()?;
    let quote = rt.block_on(fetcher.quote());
    info!(requests = fetcher.request_count(), source = ?quote.source, "price complete");
    println!("{}", serde_json::to_string_pretty(&quote)?);
    Ok(())
}

fn run_watch(config: &LuminaConfig, args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = with_pair(config, args.asset, args.vs);
    if let Some(ms) = args.interval_ms {
        config.poll.interval_ms = ms;
    }
    if !config.poll.enabled {
        tracing::warn!("polling disabled in config (poll.enabled = false), nothing to watch");
        return Ok(());
    }
    let cache = QuoteCache::open(cache_path(&args.cache_dir))?;
    let fetcher = Arc::new(PriceFetcher::new(config.price_config(false), Some(cache))?);
    let store = Arc::new(FeedStore::new());
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let (f, s) = (Arc::clone(&fetcher), Arc::clone(&store));
        let sink = Arc::clone(&store);
        let options = config
            .poll
            .to_options()
            .on_error(move |failure| sink.record_error(failure));
        let mut poller = PollingLoop::new(
            poll_callback(move || {
                let (f, s) = (Arc::clone(&f), Arc::clone(&s));
                async move {
                    let quote = f.fetch_with_retry().await?;
                    s.record_quote(quote);
                    Ok::<(), PriceError>(())
                }
            }),
            options,
        );

        let mut rx = store.subscribe();
        let printer = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let line = serde_json::to_string(&*rx.borrow_and_update());
                match line {
                    Ok(line) => println!("{} {}", now_rfc3339(), line),
                    Err(e) => tracing::warn!(error = %e, "serialize snapshot"),
                }
            }
        });

        poller.start();
        tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;
        poller.stop();
        info!(firings = poller.firings(), "watch complete");
        drop(poller);
        printer.abort();
    });

    let snap = store.snapshot();
    println!("{}", serde_json::to_string_pretty(&snap)?);
    Ok(())
}

fn run_config(config: &LuminaConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_respects_disabled_polling() {
        let mut config = LuminaConfig::default();
        config.poll.enabled = false;
        let cache_dir = std::env::temp_dir().join(format!("lumina-watch-off-{}", std::process::id()));
        let args = WatchArgs {
            asset: None,
            vs: None,
            interval_ms: Some(50),
            duration_secs: 3600,
            cache_dir: cache_dir.clone(),
        };
        let start = std::time::Instant::now();
        run_watch(&config, args).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!cache_dir.exists());
    }
}
