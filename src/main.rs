//! chat-relay — standalone chat proxy.
//!
//! Listens on HTTP (default 127.0.0.1:3001) and forwards `POST /api/chat`
//! through the dispatcher. All configuration comes from flags or env.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use chat_relay::adapters::openai::OpenAICompatProvider;
use chat_relay::alert::channel::{AlertChannel, LogAlertChannel, WebhookAlertChannel};
use chat_relay::alert::store::SqliteAlertStateStore;
use chat_relay::alert::AlertThrottle;
use chat_relay::auth::RateLimiter;
use chat_relay::config::ProxyArgs;
use chat_relay::dispatch::Dispatcher;
use chat_relay::server::{self, AppState};
use chat_relay::usage::SqliteUsageRecorder;

fn init_tracing(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chat_relay=info,tower_http=info".into());

    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ProxyArgs::parse();
    init_tracing(&args.log_format);

    info!("💬 chat-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let (dispatch_config, server_config) = args.into_configs().context("Invalid configuration")?;

    std::fs::create_dir_all(&server_config.data_dir).with_context(|| {
        format!("Failed to create data directory {}", server_config.data_dir.display())
    })?;

    // ── Stores ──────────────────────────────────────────────────────
    let usage = Arc::new(
        SqliteUsageRecorder::open(&server_config.db_path).context("Failed to open usage log")?,
    );
    let alert_store = Arc::new(
        SqliteAlertStateStore::open(&server_config.db_path)
            .context("Failed to open alert state store")?,
    );
    info!(db = %server_config.db_path.display(), "📦 Usage log and alert state ready");

    // ── Alerts ──────────────────────────────────────────────────────
    let channel: Arc<dyn AlertChannel> = match &server_config.alert_webhook_url {
        Some(url) => {
            info!("🚨 Rate-limit alerts → webhook");
            Arc::new(WebhookAlertChannel::new(url.clone()))
        }
        None => {
            info!("🚨 Rate-limit alerts → log (set ALERT_WEBHOOK_URL to notify elsewhere)");
            Arc::new(LogAlertChannel)
        }
    };
    let alerts = Arc::new(AlertThrottle::new(
        alert_store,
        channel,
        server_config.alert_store_policy,
    ));

    // ── Dispatcher ──────────────────────────────────────────────────
    let provider = Arc::new(OpenAICompatProvider::new(dispatch_config.attempt_timeout));
    info!(
        model = %dispatch_config.model,
        primary = %dispatch_config.primary.url,
        secondary = dispatch_config.secondary.as_ref().map(|s| s.url.as_str()).unwrap_or("none"),
        max_attempts = dispatch_config.max_attempts,
        backoff_base_ms = dispatch_config.backoff_base.as_millis() as u64,
        "🔀 Dispatcher configured"
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(dispatch_config),
        provider,
        usage.clone(),
        alerts,
    ));

    // ── HTTP ────────────────────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::new(server_config.rate_limit_per_minute, 60));
    let app = server::router(AppState::new(dispatcher, usage, limiter));

    let listener = tokio::net::TcpListener::bind(server_config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.listen))?;
    info!(addr = %server_config.listen, "🌐 chat-relay listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("👋 chat-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed.
        std::future::pending::<()>().await;
    }
}
