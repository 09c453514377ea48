mod cli;
mod config;
mod filter;
mod gateway;
mod logging;
mod renderer;
mod secret;
mod store;
mod telegram;
mod verify;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use cli::{Cli, Command};
use filter::AbuseFilter;
use gateway::{ModerationGateway, TelegramGateway};
use renderer::{CaptchaRenderer, ChallengeRenderer};
use store::{MemoryStore, SessionStore};
use telegram::dispatch::Dispatcher;
use verify::reaper::ReaperConfig;
use verify::{SessionManager, VerifyConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand or explicit `start` both run the bot.
        None | Some(Command::Start) => run_bot().await,

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

/// Run the bot: wire the gateway, store, manager, filter, and the two
/// background loops, then wait for a shutdown signal.
async fn run_bot() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;
    let cfg = config::Config::from_env()?;

    let gateway: Arc<dyn ModerationGateway> = Arc::new(TelegramGateway::new(
        cfg.api_base_url.clone(),
        cfg.bot_token.clone(),
    ));
    let renderer: Arc<dyn ChallengeRenderer> = Arc::new(CaptchaRenderer::new());
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());

    let manager = Arc::new(SessionManager::new(
        store.clone(),
        gateway.clone(),
        renderer,
        VerifyConfig {
            idle_seconds: cfg.idle_seconds,
            // Dev convenience: bans lift themselves so a tester can rejoin.
            lift_bans_after: dev_mode().then(|| Duration::from_secs(5)),
            ..VerifyConfig::default()
        },
    ));
    let filter = Arc::new(AbuseFilter::new(
        gateway.clone(),
        Arc::new(cfg.blacklists.clone()),
    ));
    let dispatcher = Arc::new(Dispatcher::new(manager.clone(), filter, gateway));

    log_startup_banner(&cfg);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let reaper_config = ReaperConfig {
        sweep_interval: Duration::from_secs(cfg.sweep_interval_seconds),
        idle_threshold: Duration::from_secs(cfg.idle_seconds),
        ..ReaperConfig::default()
    };
    tokio::spawn(verify::reaper::reaper_loop(
        manager,
        store,
        reaper_config,
        shutdown_rx.clone(),
    ));

    let receive = tokio::spawn(telegram::receive::receive_loop(
        cfg.api_base_url,
        cfg.bot_token,
        dispatcher,
        shutdown_rx,
    ));

    let reason = await_shutdown_trigger().await;
    info!("Shutdown signal received ({})", reason);
    let _ = shutdown_tx.send(true);
    let _ = receive.await;

    info!("Gatehouse shut down");
    Ok(())
}

/// Whether the GATEHOUSE_DEV environment variable enables dev mode.
fn dev_mode() -> bool {
    std::env::var("GATEHOUSE_DEV")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Initialize logging based on the GATEHOUSE_DEV environment variable.
fn init_logging_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let log_config = if dev_mode() {
        logging::LogConfig::development()
    } else {
        logging::LogConfig::production()
    };
    logging::init_logging(log_config)?;
    Ok(())
}

fn log_startup_banner(cfg: &config::Config) {
    info!("Gatehouse v{}", env!("CARGO_PKG_VERSION"));
    info!("Bot API base: {}", cfg.api_base_url);
    info!(
        "Verification: {}s idle threshold, {}s sweep interval",
        cfg.idle_seconds, cfg.sweep_interval_seconds
    );
    info!(
        "Blacklists: {} ids, {} names, {} keywords, {} sticker sets, {} emoji sets",
        cfg.blacklists.user_ids.len(),
        cfg.blacklists.names.len(),
        cfg.blacklists.keywords.len(),
        cfg.blacklists.sticker_sets.len(),
        cfg.blacklists.emoji_sets.len()
    );
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            match tokio::signal::ctrl_c().await {
                Ok(()) => "ctrl-c",
                Err(e) => {
                    panic!("Failed to install Ctrl+C handler: {}", e);
                }
            }
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            panic!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}
