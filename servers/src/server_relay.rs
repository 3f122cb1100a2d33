use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_relay::{
    spawn_sweeper, AparatCredentialFetcher, DedupCache, Dispatcher, EventClassifier,
    UpstreamManager, WssConnector,
};

mod relay_logic;
use relay_logic::{config, downstream, logger};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    // A missing .env is the normal case outside development.
    let _ = dotenvy::dotenv();

    let settings = config::load_config()?;
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    match &settings.config_file {
        Some(path) => tracing::info!(path = %path.display(), "Loaded config file"),
        None => tracing::info!("No config file found, using defaults and environment/CLI values"),
    }
    tracing::info!(
        streamer = %settings.streamer_name,
        port = settings.port,
        reconnect_delay_ms = settings.reconnect_delay.as_millis() as u64,
        follow_cooldown_secs = settings.follow_cooldown.as_secs(),
        cleanup_interval_secs = settings.cleanup_interval.as_secs(),
        "Starting relay"
    );

    let shutdown = CancellationToken::new();
    let dispatcher = Arc::new(Dispatcher::new());

    let dedup = Arc::new(DedupCache::new(settings.follow_cooldown));
    let sweeper_handle = spawn_sweeper(dedup.clone(), settings.cleanup_interval, shutdown.clone());

    let fetcher = AparatCredentialFetcher::new(&settings.credential_url, settings.http_timeout)
        .context("Invalid credential URL")?;
    let manager = UpstreamManager::new(
        settings.upstream(),
        fetcher,
        WssConnector::new(settings.connect_timeout),
        EventClassifier::new(dedup, settings.classifier_options()),
        dispatcher.clone(),
        shutdown.clone(),
    );
    let upstream_handle = tokio::spawn(manager.run());

    let mut downstream_handle = tokio::spawn(downstream::run(
        settings.port,
        downstream::AppState {
            dispatcher: dispatcher.clone(),
            greeting: Arc::from(settings.greeting.as_str()),
            shutdown: shutdown.clone(),
        },
    ));

    // Wait for a shutdown signal, or for the subscriber server to die on its own.
    let server_result = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut downstream_handle => Some(result),
    };

    // Send shutdown signal to all components
    shutdown.cancel();
    dispatcher.close_all();

    let server_result = match server_result {
        Some(result) => result,
        None => downstream_handle.await,
    };
    let _ = tokio::join!(upstream_handle, sweeper_handle);

    match server_result {
        Ok(Ok(())) => {
            tracing::info!("Shutdown complete.");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %format!("{e:#}"), "Subscriber server stopped with an error");
            Err(e)
        }
        Err(e) => Err(e).context("Subscriber server task panicked"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl-C received, initiating shutdown.");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                tracing::info!("SIGTERM received, initiating shutdown.");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    // On non-unix platforms, just wait forever.
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
