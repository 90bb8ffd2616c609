use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use content_release::{
    api,
    collaborators::{HttpRenderer, Renderer},
    config::Config,
    content_store::LocalStore,
    notifications::{NotificationSink, WebhookSink},
    AppState, Collaborators,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "content-release starting");

    // Load configuration
    let config = Config::load()?;

    // Published content store
    let content = LocalStore::new(&config.storage.content_path)?;
    info!("Content store at: {}", config.storage.content_path);

    // External collaborators
    let mut collaborators = Collaborators::default();
    if let Some(url) = &config.collaborators.renderer_url {
        let renderer: Arc<dyn Renderer> = Arc::new(HttpRenderer::new(url, config.step_timeout())?);
        collaborators.renderer = Some(renderer);
        info!("Rendering pages via: {url}");
    }
    if !config.collaborators.notification_urls.is_empty() {
        let sink: Arc<dyn NotificationSink> =
            Arc::new(WebhookSink::new(config.collaborators.notification_urls.clone())?);
        collaborators.sinks.push(sink);
        info!(
            "Publish notifications to {} webhook(s)",
            config.collaborators.notification_urls.len()
        );
    }

    // Create shared state and start the approval worker
    let admin = config.admin.clone();
    let (state, approval_worker) = AppState::build(config, Arc::new(content), collaborators)?;
    info!("Database opened at: {}", state.config.storage.data_dir);
    info!("Collections at: {}", state.config.storage.collections_path);

    let interrupted = state.recover_interrupted_approvals().await?;
    if interrupted > 0 {
        warn!(count = interrupted, "Approvals interrupted by the last shutdown marked as failed");
    }

    if let Some(admin) = &admin {
        state.bootstrap_admin(admin)?;
        info!(email = %admin.email, "Administrator account ready");
    }

    // Background tasks
    let scheduler = state.scheduler().start();
    let session_reaper = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                state.keys.expire_sessions();
            }
        })
    };

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&state.config.server.bind_address).await?;
    info!("Listening on: {}", state.config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: abort background tasks. A running approval job is abandoned and
    // its collection stays IN_PROGRESS until unlocked by hand.
    info!("Shutting down background tasks");
    scheduler.abort();
    session_reaper.abort();
    approval_worker.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
