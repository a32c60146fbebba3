//! Headless runner: connects to the backend, mirrors the device fleet and
//! logs state changes. The library is the real product; this binary exists
//! for bench testing against a live backend.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use subsea_console::api::types::Preferences;
use subsea_console::registry::ports;
use subsea_console::sync::SNAPSHOT_POLL_INTERVAL;
use subsea_console::{ApiClient, Backend, Event, Notice, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "subsea-console", about = "Camera fleet state mirror")]
struct Args {
    /// Backend base URL (falls back to SUBSEA_API_URL, then the vehicle default)
    #[arg(long)]
    api_url: Option<String>,

    /// Snapshot re-poll interval in seconds
    #[arg(long, default_value_t = SNAPSHOT_POLL_INTERVAL.as_secs())]
    poll_interval: u64,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    env_logger::init();

    let args = Args::parse();
    let api_url = args
        .api_url
        .or_else(|| std::env::var("SUBSEA_API_URL").ok())
        .unwrap_or_else(|| "http://192.168.2.2:5000".to_string());
    log::info!("connecting to backend at {api_url}");

    let client = Arc::new(ApiClient::new(&api_url));

    let preferences = match client.fetch_preferences().await {
        Ok(p) => p,
        Err(e) => {
            log::warn!("could not fetch preferences, using defaults: {e}");
            Preferences::default()
        }
    };
    let host = if preferences.suggest_host {
        match client.fetch_recommended_host().await {
            Ok(host) => host,
            Err(e) => {
                log::warn!("recommended host lookup failed: {e}");
                preferences.default_stream.host.clone()
            }
        }
    } else {
        preferences.default_stream.host.clone()
    };
    log::info!("default endpoint target: {host}");

    let (notice_tx, mut notice_rx) = tokio::sync::mpsc::channel(32);
    let (engine, handle) = SyncEngine::new(
        Arc::clone(&client),
        Duration::from_secs(args.poll_interval),
    );
    let engine_task = tokio::spawn(engine.with_notices(notice_tx).run());

    // No push transport in the headless runner; the snapshot poll carries
    // the session after the initial fetch.
    handle.send(Event::ChannelUp).await;

    let mut devices = handle.devices();
    let fallback_port = preferences.default_stream.port;

    loop {
        tokio::select! {
            changed = devices.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = devices.borrow_and_update().clone();
                log::info!(
                    "{} devices, next free UDP port {}",
                    view.len(),
                    ports::next_port(&view, fallback_port)
                );
            }
            Some(notice) = notice_rx.recv() => {
                match notice {
                    Notice::StreamError { bus_info, errors } => {
                        log::error!("{bus_info}: stream failed: {errors:?}");
                    }
                    Notice::WriteFailed { key, error } => {
                        log::error!("write not persisted for {key:?}: {error}");
                    }
                    Notice::EditRejected { bus_info, reason } => {
                        log::warn!("{bus_info}: edit rejected: {reason}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                handle.shutdown().await;
                break;
            }
        }
    }

    let _ = engine_task.await;
}
