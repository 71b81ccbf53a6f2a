// Copyright 2026 Price Tracker Contributors
// SPDX-License-Identifier: MIT

//! Price tracker command-line front end and background daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use price_tracker::config::MAX_CHECK_INTERVAL_MINUTES;
use price_tracker::events::badge_text;
use price_tracker::fetch::{HttpFetcher, RemoteFetcher};
use price_tracker::messages::handle_message_scheduled;
use price_tracker::notify::{format_rub, Alert, NotificationDispatcher};
use price_tracker::scheduler::{self, SchedulerHandle};
use price_tracker::snapshot::PageSnapshot;
use price_tracker::storage::JsonFileStore;
use price_tracker::{
    PriceTracker, ProductRepository, RefreshOutcome, StatusBroadcaster, TrackedProduct,
    TrackerConfig, TrackerEvent, TrackerSettings, UpdateSource,
};

#[derive(Parser)]
#[command(
    name = "price-tracker",
    about = "Track marketplace product prices and get alerted on drops",
    version
)]
struct Cli {
    /// Directory holding the tracker store (overrides PRICE_TRACKER_HOME).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking the product at a page URL.
    Track {
        url: String,
        /// Alert threshold in whole rubles.
        #[arg(long)]
        target: Option<String>,
    },

    /// Stop tracking a product.
    Untrack { id: String },

    /// List tracked products.
    List,

    /// Show the status of one product.
    Status {
        id: String,
        /// Price currently shown on the page, recorded if it differs.
        #[arg(long)]
        price: Option<u64>,
    },

    /// Set or clear (`none`) the alert threshold of a product.
    Target { id: String, value: String },

    /// Check all tracked products now.
    Check,

    /// Show or change tracker settings.
    Settings {
        /// Minutes between background checks.
        #[arg(long)]
        interval: Option<u64>,
        /// Seller API client id.
        #[arg(long)]
        client_id: Option<String>,
        /// Seller API key.
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Run the background checker until interrupted.
    ///
    /// With --stdio, newline-delimited JSON messages on stdin are handled
    /// and their responses written to stdout.
    Run {
        #[arg(long)]
        stdio: bool,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   price-tracker completions bash > ~/.local/share/bash-completion/completions/price-tracker
    ///   price-tracker completions zsh > ~/.zfunc/_price-tracker
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

/// Prints alerts to the terminal.
struct TerminalNotifier;

#[async_trait]
impl NotificationDispatcher for TerminalNotifier {
    async fn dispatch(&self, alert: &Alert) -> price_tracker::Result<()> {
        let text = format!("🔔 {}\n{}\n", alert.heading(), alert.body());
        let mut stderr = tokio::io::stderr();
        stderr.write_all(text.as_bytes()).await?;
        Ok(())
    }
}

struct App {
    tracker: Arc<PriceTracker>,
    fetcher: Arc<HttpFetcher>,
    json: bool,
}

fn build(cli: &Cli) -> anyhow::Result<App> {
    let mut config = TrackerConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data dir {}", config.data_dir.display()))?;
    tracing::debug!("store: {}", config.store_path().display());

    let store = Arc::new(JsonFileStore::new(config.store_path()));
    let fetcher = Arc::new(HttpFetcher::new(config.http_timeout)?);
    let tracker = PriceTracker::new(
        ProductRepository::new(store),
        fetcher.clone(),
        Arc::new(TerminalNotifier),
        StatusBroadcaster::default(),
    )
    .with_config(config);
    Ok(App {
        tracker: Arc::new(tracker),
        fetcher,
        json: cli.json,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "price-tracker", &mut std::io::stdout());
        return Ok(());
    }

    let app = build(&cli)?;
    app.tracker
        .reload_settings()
        .await
        .context("failed to load settings")?;

    match cli.command {
        Commands::Track { url, target } => cmd_track(&app, &url, target).await,
        Commands::Untrack { id } => {
            app.tracker.untrack(&id).await?;
            emit(&app, json!({ "ok": true, "id": id }), || format!("Untracked {id}"));
            Ok(())
        }
        Commands::List => cmd_list(&app).await,
        Commands::Status { id, price } => {
            let status = app.tracker.get_status(&id, price).await?;
            let text = if status.is_tracked {
                format!(
                    "{id}: {} (avg {}, drop {}, target {}, updated {})",
                    opt_rub(status.current_price),
                    opt_rub(status.average_price),
                    opt_rub(status.price_drop),
                    opt_rub(status.target_price),
                    opt_time(status.last_update)
                )
            } else {
                format!("{id} is not tracked")
            };
            emit(&app, serde_json::to_value(&status)?, || text);
            Ok(())
        }
        Commands::Target { id, value } => {
            let raw = match value.trim().to_ascii_lowercase().as_str() {
                "none" | "clear" | "off" => Value::Null,
                _ => Value::String(value.clone()),
            };
            let target = app.tracker.set_target_price(&id, &raw).await?;
            emit(&app, json!({ "ok": true, "targetPrice": target }), || match target {
                Some(t) => format!("Target for {id}: {}", format_rub(t)),
                None => format!("Target for {id} cleared"),
            });
            Ok(())
        }
        Commands::Check => cmd_check(&app).await,
        Commands::Settings {
            interval,
            client_id,
            api_key,
        } => cmd_settings(&app, interval, client_id, api_key).await,
        Commands::Run { stdio } => cmd_run(&app, stdio).await,
        Commands::Completions { .. } => Ok(()),
    }
}

fn emit(app: &App, value: Value, text: impl FnOnce() -> String) {
    if app.json {
        println!("{value}");
    } else {
        println!("{}", text());
    }
}

fn opt_rub(value: Option<u64>) -> String {
    value.map(format_rub).unwrap_or_else(|| "—".to_string())
}

fn opt_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

async fn cmd_track(app: &App, url: &str, target: Option<String>) -> anyhow::Result<()> {
    let html = app
        .fetcher
        .fetch_page(url)
        .await
        .with_context(|| format!("failed to fetch {url}"))?;
    let snapshot = PageSnapshot::parse(url, &html);
    let Some(mut candidate) = snapshot.into_candidate() else {
        bail!("no product id found in {url}");
    };
    candidate.target_price = target.map(Value::String);

    let status = app.tracker.track(candidate).await?;
    let product = app.tracker.repository().get(&status.id).await?;
    emit(app, serde_json::to_value(&status)?, || {
        let title = product.as_ref().map(|p| p.title.as_str()).unwrap_or("");
        format!(
            "Tracking {} {title} at {}",
            status.id,
            opt_rub(status.current_price)
        )
    });
    Ok(())
}

async fn cmd_list(app: &App) -> anyhow::Result<()> {
    let products = app.tracker.list().await?;
    if app.json {
        println!("{}", serde_json::to_string(&products)?);
        return Ok(());
    }
    if products.is_empty() {
        println!("Nothing tracked yet.");
        return Ok(());
    }
    for product in &products {
        println!("{}", describe(product));
    }
    Ok(())
}

fn describe(product: &TrackedProduct) -> String {
    let category = product
        .primary_category()
        .map(|c| format!(" [{c}]"))
        .unwrap_or_default();
    format!(
        "{:<12} {:>12}  avg {:>10}  drop {:>8}  target {:>10}  {}{category}",
        product.id,
        format_rub(product.last_known_price),
        opt_rub(product.average_price()),
        opt_rub(product.price_drop()),
        opt_rub(product.target_price),
        product.title
    )
}

async fn cmd_check(app: &App) -> anyhow::Result<()> {
    let outcomes = app.tracker.refresh_all(UpdateSource::Manual).await?;
    if app.json {
        let map: serde_json::Map<String, Value> = outcomes
            .iter()
            .map(|(id, outcome)| (id.clone(), outcome_json(outcome)))
            .collect();
        println!("{}", Value::Object(map));
        return Ok(());
    }
    for (id, outcome) in &outcomes {
        let line = match outcome {
            RefreshOutcome::Skipped => "no price this time".to_string(),
            RefreshOutcome::Unchanged => "unchanged".to_string(),
            RefreshOutcome::Changed { previous, current } => {
                format!("{} → {}", format_rub(*previous), format_rub(*current))
            }
        };
        println!("{id}: {line}");
    }
    Ok(())
}

fn outcome_json(outcome: &RefreshOutcome) -> Value {
    match outcome {
        RefreshOutcome::Skipped => json!({ "outcome": "skipped" }),
        RefreshOutcome::Unchanged => json!({ "outcome": "unchanged" }),
        RefreshOutcome::Changed { previous, current } => {
            json!({ "outcome": "changed", "previous": previous, "current": current })
        }
    }
}

async fn cmd_settings(
    app: &App,
    interval: Option<u64>,
    client_id: Option<String>,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let mut settings: TrackerSettings = app.tracker.settings();
    let changed = interval.is_some() || client_id.is_some() || api_key.is_some();
    if let Some(minutes) = interval {
        settings.check_interval_minutes = minutes.clamp(1, MAX_CHECK_INTERVAL_MINUTES);
    }
    if let Some(id) = client_id {
        settings.seller_api_client_id = Some(id).filter(|s| !s.trim().is_empty());
    }
    if let Some(key) = api_key {
        settings.seller_api_key = Some(key).filter(|s| !s.trim().is_empty());
    }
    if changed {
        app.tracker.update_settings(settings.clone()).await?;
    }

    let mut shown = serde_json::to_value(&settings)?;
    if let Some(key) = shown.get_mut("sellerApiKey") {
        *key = json!("********");
    }
    emit(app, shown, || {
        format!(
            "check interval: {} min\nseller API: {}",
            settings.check_interval_minutes,
            if settings.seller_credentials().is_some() {
                "configured"
            } else {
                "not configured"
            }
        )
    });
    Ok(())
}

async fn cmd_run(app: &App, stdio: bool) -> anyhow::Result<()> {
    let handle = SchedulerHandle::new();
    let checker = scheduler::spawn(app.tracker.clone(), handle.clone());

    let mut events = app.tracker.broadcaster().subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TrackerEvent::ProductStatusUpdated(status) => {
                    tracing::debug!("status {}: {:?}", status.id, status.current_price)
                }
                TrackerEvent::TrackedCountChanged { count } => {
                    tracing::debug!("tracking {count} product(s), badge {:?}", badge_text(count))
                }
            }
        }
    });

    tracing::info!("price tracker running; press Ctrl-C to stop");
    if stdio {
        let tracker = app.tracker.clone();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let message: Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!("ignoring malformed message: {e}");
                            continue;
                        }
                    };
                    let response = handle_message_scheduled(&tracker, &handle, message).await;
                    if let Some(response) = response {
                        stdout.write_all(format!("{response}\n").as_bytes()).await?;
                        stdout.flush().await?;
                    }
                }
            }
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
    }

    handle.shutdown();
    checker.await.context("price check loop panicked")?;
    watcher.abort();
    Ok(())
}
