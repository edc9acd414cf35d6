// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use rustls::crypto::{CryptoProvider, ring};
use tokio::time::sleep;

use garden_stock_feed::{
    FeedClient,
    config::{Config, load_config},
    dashboard::Dashboard,
};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Composition root of the stock feed console.
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration and set up logging
// - Create the single FeedClient and attach the dashboard
// - Wire unix signals to resume / force reconnect
// - Shut the connection down cleanly on Ctrl-C
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // IMPORTANT:
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation. This must be executed exactly once and
    // as early as possible in the process lifecycle.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow!("failed to install rustls CryptoProvider"))?;

    // --------------------------------------------------------
    // Configuration
    //
    // Path resolution:
    // 1. first CLI argument
    // 2. FEED_CONFIG environment variable
    // 3. ./config.json (optional, defaults when missing)
    // --------------------------------------------------------
    let (path, required) = config_path();
    let config: Config = load_config(&path, required)?;

    let default_filter = if config.verbose() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    log::info!(
        "Stock feed starting (config: {}, upstream: {})",
        path.display(),
        config.feed.url
    );

    // --------------------------------------------------------
    // Feed client + dashboard
    //
    // One client per process. The dashboard is just another
    // subscriber; it stays registered for the whole session.
    // --------------------------------------------------------
    let client = FeedClient::spawn(config.feed.clone());

    let dashboard = Arc::new(Dashboard::new(config.dashboard.clone()));
    let on_snapshot = dashboard.clone();
    client
        .subscribe(
            move |snapshot| on_snapshot.show_snapshot(snapshot),
            move |state| dashboard.show_connection(state),
        )
        .detach();

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    if config.metrics_interval_secs > 0 {
        let metrics = client.metrics();
        let interval = Duration::from_secs(config.metrics_interval_secs);
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                log::info!("{}", metrics.report_line());
            }
        });
    }

    #[cfg(unix)]
    spawn_signal_handlers(client.clone())?;

    // --------------------------------------------------------
    // Run until Ctrl-C, then close the socket deliberately
    // --------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    log::info!("Ctrl-C received");
    client.shutdown().await;

    Ok(())
}

fn config_path() -> (PathBuf, bool) {
    if let Some(arg) = std::env::args_os().nth(1) {
        return (PathBuf::from(arg), true);
    }
    if let Some(env) = std::env::var_os("FEED_CONFIG") {
        return (PathBuf::from(env), true);
    }
    (PathBuf::from("config.json"), false)
}

// ------------------------------------------------------------
// Signal wiring
// ------------------------------------------------------------
//
// SIGUSR1: host is active again (e.g. after suspend) -> resume
// SIGHUP:  drop the connection and start over         -> force reconnect
//
#[cfg(unix)]
fn spawn_signal_handlers(client: FeedClient) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut hup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = usr1.recv() => {
                    log::info!("SIGUSR1 received, resuming feed");
                    client.resume();
                }
                Some(()) = hup.recv() => {
                    log::info!("SIGHUP received, forcing reconnect");
                    client.force_reconnect();
                }
                else => break,
            }
        }
    });

    Ok(())
}
