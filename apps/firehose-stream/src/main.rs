//! Firehose Stream Binary
//!
//! Subscribes to the Bluesky Jetstream firehose and logs every classified
//! event and every background error.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin firehose-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Subscription
//! - `FIREHOSE_COLLECTIONS`: Comma-separated collection NSIDs (default: posts, likes, reposts, follows)
//! - `FIREHOSE_AUTHORS`: Comma-separated DIDs (default: everyone)
//! - `FIREHOSE_CURSOR`: Resume position in Unix microseconds
//! - `FIREHOSE_BUFFER_SIZE`: Delivery queue capacity (default: 1000)
//! - `FIREHOSE_REQUIRE_HELLO`: Hold events until the options message is sent (default: false)
//! - `FIREHOSE_COMPRESS`: Refused at startup; compressed frames cannot be decoded
//!
//! ## Connection
//! - `FIREHOSE_ENDPOINTS`: Comma-separated endpoint overrides
//! - `FIREHOSE_RECONNECT_DELAY_INITIAL_MS` (default: 1000), `FIREHOSE_RECONNECT_DELAY_MAX_SECS` (default: 120)
//! - `FIREHOSE_PING_INTERVAL_SECS` (default: 60), `FIREHOSE_READ_TIMEOUT_SECS` (default: 300)
//! - `FIREHOSE_HANDSHAKE_TIMEOUT_SECS` (default: 10)
//! - `FIREHOSE_ERROR_BUFFER_SIZE` (default: 100)
//! - `FIREHOSE_BLOB_HOST` (default: <https://bsky.social>)
//!
//! ## Account (optional)
//! - `FIREHOSE_IDENTIFIER`, `FIREHOSE_APP_PASSWORD`: Log in and keep the session renewed
//! - `FIREHOSE_PDS_HOST`: Account service (default: <https://bsky.social>)
//!
//! ## Operations
//! - `FIREHOSE_HEALTH_PORT`: Health and metrics HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: firehose-stream)
//! - `RUST_LOG`: Log filter (default: `firehose_stream=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use firehose_stream::infrastructure::atproto::{AtprotoConverter, XrpcSessionProvider};
use firehose_stream::infrastructure::health::{HealthServer, HealthServerState};
use firehose_stream::infrastructure::telemetry;
use firehose_stream::{
    DomainEvent, ErrorStream, EventStream, FirehoseClient, FirehoseConfig, RenewalConfig,
    RenewalScheduler, init_metrics,
};
use futures_util::StreamExt;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Interval between progress summaries.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting firehose stream");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = FirehoseConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let client = FirehoseClient::new(
        config.stream.client_config(),
        Arc::new(AtprotoConverter::new(config.stream.blob_host.clone())),
    );
    let errors = client
        .take_errors()
        .context("error stream already taken")?;
    let stream = client.stream_events(config.subscription.to_request())?;

    let _renewal = match config.auth.credentials() {
        Some((identifier, password)) => {
            Some(start_session(&client, &config.auth.service, identifier, password).await?)
        }
        None => {
            tracing::info!("No account credentials, session renewal disabled");
            None
        }
    };

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            stream.status(),
            client.error_sink(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tokio::spawn(log_errors(errors));

    tracing::info!(stream_id = %stream.id(), "Firehose stream ready");

    tokio::select! {
        () = consume(stream) => {
            tracing::warn!("Event stream ended");
        }
        () = await_shutdown() => {}
    }

    shutdown_token.cancel();
    client.shutdown();

    tracing::info!("Firehose stream stopped");
    Ok(())
}

/// Log events as they arrive, with a periodic summary.
async fn consume(mut stream: EventStream) {
    let status = stream.status();
    let mut summary = tokio::time::interval(SUMMARY_INTERVAL);
    summary.tick().await;

    loop {
        tokio::select! {
            event = stream.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = summary.tick() => {
                let snapshot = status.snapshot();
                tracing::info!(
                    state = %snapshot.state,
                    frames = snapshot.frames_received,
                    delivered = snapshot.events_delivered,
                    dropped = snapshot.events_dropped,
                    last_cursor = ?snapshot.last_cursor,
                    "Firehose progress"
                );
            }
        }
    }
}

fn log_event(event: &DomainEvent) {
    match event.post() {
        Some(post) => tracing::debug!(
            kind = %event.kind(),
            seq = event.sequence,
            repo = %event.repo,
            uri = %post.uri,
            "Received post"
        ),
        None => tracing::debug!(
            kind = %event.kind(),
            seq = event.sequence,
            repo = %event.repo,
            "Received event"
        ),
    }
}

/// Log in and keep the session renewed until shutdown.
async fn start_session(
    client: &FirehoseClient,
    service: &str,
    identifier: &str,
    password: &str,
) -> anyhow::Result<Arc<RenewalScheduler>> {
    let provider = XrpcSessionProvider::new(service)?;
    let session = provider
        .login(identifier, password)
        .await
        .with_context(|| format!("login to {service} failed"))?;
    tracing::info!(
        did = %session.did(),
        handle = %session.handle(),
        expires_at = %session.expires_at(),
        "Logged in"
    );

    let scheduler =
        client.start_session_renewal(Arc::new(provider), session, RenewalConfig::default())?;
    Ok(scheduler)
}

/// Log background errors until every sender is gone.
async fn log_errors(errors: ErrorStream) {
    let mut errors = errors.into_stream();
    while let Some(error) = errors.next().await {
        tracing::warn!(category = error.category(), error = %error, "Firehose error");
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FirehoseConfig) {
    tracing::info!(
        collections = ?config.subscription.collections,
        authors = config.subscription.authors.len(),
        cursor = ?config.subscription.cursor.map(|c| c.as_micros()),
        buffer_size = config.subscription.buffer_size,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        endpoints = ?config.stream.endpoints,
        reconnect_initial_ms = u64::try_from(config.stream.reconnect_delay_initial.as_millis()).unwrap_or(u64::MAX),
        reconnect_max_secs = config.stream.reconnect_delay_max.as_secs(),
        read_timeout_secs = config.stream.read_timeout.as_secs(),
        "Connection settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
