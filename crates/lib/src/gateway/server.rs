//! Relay process wiring: Slack channel + backend client + forwarder + listener.

use crate::backend::BackendClient;
use crate::channels::{ChannelHandle, SlackChannel};
use crate::config::{self, Config};
use crate::forwarder::{Forwarder, ForwarderOptions};
use crate::gateway::listener::{Listener, ListenerOptions};
use anyhow::Result;
use std::sync::Arc;

/// Run the relay until the Socket Mode feed fails or the process is asked to stop
/// (SIGINT or SIGTERM). Slack tokens are required; a missing backend URL is only
/// warned about, since it fails each forward rather than startup.
pub async fn run_relay(config: Config) -> Result<()> {
    let Some(bot_token) = config::resolve_slack_bot_token(&config) else {
        anyhow::bail!("slack bot token not configured (set SLACK_BOT_TOKEN or slack.botToken)");
    };
    let Some(app_token) = config::resolve_slack_app_token(&config) else {
        anyhow::bail!("slack app token not configured (set SLACK_APP_TOKEN or slack.appToken)");
    };
    let backend_url = config::resolve_backend_url(&config);
    match &backend_url {
        Some(url) => log::info!("backend endpoint: {}", url),
        None => log::warn!("BACKEND_URL is not set; mentions will be acknowledged but not answered"),
    }
    let slack = Arc::new(SlackChannel::new(Some(bot_token), Some(app_token)));
    let channel: Arc<dyn ChannelHandle> = slack.clone();
    let backend = BackendClient::new(backend_url, config.backend.connect_timeout());
    let forwarder = Arc::new(Forwarder::new(
        backend,
        channel,
        ForwarderOptions {
            forward_timeout: config.relay.forward_timeout(),
            failure_notice: config.relay.failure_notice.clone(),
        },
    ));
    let mut listener = Listener::new(
        forwarder,
        ListenerOptions {
            processing_message: config.relay.processing_message.clone(),
            max_in_flight: config.relay.max_in_flight,
        },
    );
    let mut feed = slack.socket_mode_feed();

    log::info!("{} started", config.telemetry.service_name);
    tokio::select! {
        report = listener.run(&mut feed) => {
            let report = report?;
            log::info!(
                "listener stopped: {} event(s), {} mention(s), {} dispatched, {} rejected",
                report.events,
                report.mentions,
                report.dispatched,
                report.rejected
            );
        }
        _ = shutdown_signal() => {
            log::info!("shutdown signal received, stopping listener");
        }
    }
    log::info!("{} stopped", config.telemetry.service_name);
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
