mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use pricewatch::browser::resolve::resolve_chrome;
use pricewatch::browser::session::ChromiumRenderer;
use pricewatch::config::{AppConfig, CliOverrides};
use pricewatch::engine::preference::PreferenceStore;
use pricewatch::engine::retry;
use pricewatch::engine::PriceEngine;
use pricewatch::extract::product_name;
use pricewatch::model::{AlertKind, TargetId};
use pricewatch::output;
use pricewatch::store::{JsonFileStore, TargetStore};
use pricewatch::vision::VisionServices;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        "pricewatch=debug"
    } else {
        "pricewatch=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = AppConfig::load(CliOverrides {
        debug: cli.debug,
        currency: cli.currency,
        data_dir: cli.data_dir,
    })?;

    ctrlc::set_handler(|| {
        eprintln!("\nInterrupted. Cleaning up...");
        std::process::exit(130);
    })
    .context("Failed to set Ctrl+C handler")?;

    let store = Arc::new(JsonFileStore::new(config.data_dir.clone()));

    let succeeded = match cli.command {
        Commands::Track { url, name } => cmd_track(&store, &url, name).await?,
        Commands::List => {
            let targets = store.list_targets().await?;
            print!("{}", output::format_targets(&targets));
            true
        }
        Commands::Check { id } => cmd_check(&config, store, TargetId(id)).await?,
        Commands::Feedback {
            id,
            primary,
            alternative,
            reject: _,
        } => cmd_feedback(&config, store, TargetId(id), primary, alternative).await?,
        Commands::Alert {
            id,
            below,
            drop_percent,
        } => cmd_alert(&store, TargetId(id), below, drop_percent).await?,
        Commands::Retry => cmd_retry(&config, store).await?,
        Commands::Health => cmd_health(&config).await?,
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_track(store: &JsonFileStore, raw_url: &str, name: Option<String>) -> Result<bool> {
    let url = url::Url::parse(raw_url).with_context(|| format!("Invalid URL: {}", raw_url))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("Only http(s) URLs can be tracked: {}", raw_url);
    }

    let name = name
        .or_else(|| product_name::from_url(url.as_str()))
        .or_else(|| url.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string());

    let target = store.add_target(url.as_str(), &name).await?;
    println!("Tracking #{}: {} ({})", target.id, target.name, target.url);
    Ok(true)
}

async fn cmd_check(config: &AppConfig, store: Arc<JsonFileStore>, id: TargetId) -> Result<bool> {
    let target = store.get_target(id).await?;
    let (engine, renderer) = launch_engine(config, store).await?;

    let result = engine.check_price(id).await;
    shutdown(&renderer).await;

    match result {
        Ok(outcome) => {
            print!("{}", output::format_outcome(&target, &outcome));
            Ok(true)
        }
        Err(e) => {
            print!("{}", output::format_check_error(&target, &e));
            Ok(false)
        }
    }
}

async fn cmd_feedback(
    config: &AppConfig,
    store: Arc<JsonFileStore>,
    id: TargetId,
    primary: bool,
    alternative: bool,
) -> Result<bool> {
    store.get_target(id).await?;
    let preferences = PreferenceStore::new(store, config.preference.clone());
    let method = preferences
        .apply_feedback(id, primary, alternative, Utc::now())
        .await?;
    println!("Target #{} now prefers {} extraction", id, method);
    Ok(true)
}

async fn cmd_alert(
    store: &JsonFileStore,
    id: TargetId,
    below: Option<f64>,
    drop_percent: Option<f64>,
) -> Result<bool> {
    let kind = match (below, drop_percent) {
        (Some(target_price), _) if target_price > 0.0 => AlertKind::PriceDrop { target_price },
        (None, Some(percentage)) if percentage > 0.0 && percentage < 100.0 => {
            AlertKind::PercentageDrop { percentage }
        }
        _ => anyhow::bail!("Alert threshold must be a positive price or a percentage below 100"),
    };
    let alert = store.add_alert(id, kind).await?;
    println!("Added alert {} to target #{}", output::format_alert(&alert), id);
    Ok(true)
}

async fn cmd_retry(config: &AppConfig, store: Arc<JsonFileStore>) -> Result<bool> {
    let targets = store.list_targets().await?;
    if retry::due(&targets, Utc::now()).is_empty() {
        println!("No targets are due for a retry.");
        return Ok(true);
    }

    let (engine, renderer) = launch_engine(config, store).await?;
    let results = engine.process_due_retries(Utc::now()).await;
    shutdown(&renderer).await;

    let mut all_ok = true;
    for (id, result) in results? {
        let Some(target) = targets.iter().find(|t| t.id == id) else {
            continue;
        };
        match result {
            Ok(outcome) => print!("{}", output::format_outcome(target, &outcome)),
            Err(e) => {
                all_ok = false;
                print!("{}", output::format_check_error(target, &e));
            }
        }
        println!();
    }
    Ok(all_ok)
}

async fn cmd_health(config: &AppConfig) -> Result<bool> {
    let services = VisionServices::connect(
        &config.detector_url,
        &config.recognizer_url,
        config.timeouts.request,
    )?;
    let (detector, recognizer) = services.health().await;

    let mut healthy = true;
    for (name, url, status) in [
        ("Region detector", &config.detector_url, detector),
        ("Text recognizer", &config.recognizer_url, recognizer),
    ] {
        match status {
            Ok(()) => println!("- **{}:** ok ({})", name, url),
            Err(e) => {
                healthy = false;
                println!("- **{}:** unavailable ({})", name, e);
            }
        }
    }
    Ok(healthy)
}

async fn launch_engine(
    config: &AppConfig,
    store: Arc<JsonFileStore>,
) -> Result<(PriceEngine, Arc<ChromiumRenderer>)> {
    let services = VisionServices::connect(
        &config.detector_url,
        &config.recognizer_url,
        config.timeouts.request,
    )?;

    let chrome_path = resolve_chrome(config.browser_path.as_deref())
        .context("Failed to resolve Chrome browser")?;
    let renderer = Arc::new(
        ChromiumRenderer::launch(chrome_path, config.render_settings())
            .await
            .context("Failed to launch browser")?,
    );

    let engine = PriceEngine::new(
        renderer.clone(),
        services.detector,
        services.recognizer,
        store.clone(),
        store,
        config.engine_settings(),
    );
    Ok((engine, renderer))
}

async fn shutdown(renderer: &ChromiumRenderer) {
    if let Err(e) = renderer.shutdown().await {
        tracing::warn!("Failed to close browser: {}", e);
    }
}
