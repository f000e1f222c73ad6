use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, Method};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_identity::api;
use agent_identity::config::Config;
use agent_identity::state::AppState;

/// Upper bound on the final flush after shutdown is signalled
const FINAL_PERSIST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env();
    log_policy(&config);

    let state = AppState::new(config.clone());
    match state.load_from_disk().await {
        Ok(()) => {
            let stats = state.stats();
            tracing::info!(
                "Loaded {} identities ({} active) and {} rotation records",
                stats.total_identities,
                stats.active_identities,
                stats.total_rotations
            );
        }
        Err(e) => tracing::warn!("Starting with an empty store: {}", e),
    }

    let persister = state.spawn_persister();

    let app = api::create_router(Arc::clone(&state))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Agent identity service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    if tokio::time::timeout(FINAL_PERSIST_TIMEOUT, persister).await.is_err() {
        tracing::error!("Final persist did not finish within {:?}", FINAL_PERSIST_TIMEOUT);
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_identity=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// One line per knob that changes who gets in and how often.
fn log_policy(config: &Config) {
    tracing::info!(
        "agent_identity v{}, state file {:?}",
        config.version,
        config.state_file_path()
    );
    tracing::info!(
        "Signed requests: skew window {}s, replay cache {}",
        config.max_clock_skew,
        if config.replay_cache_enabled { "on" } else { "off" }
    );
    tracing::info!(
        "Tier 0 daily write limit {}, rotation tier policy {:?}",
        config.tier0_daily_limit,
        config.rotation_tier_policy
    );
    if config.admin_keys.is_empty() {
        tracing::warn!("No ADMIN_KEYS configured, /admin routes will reject every caller");
    } else {
        tracing::info!("{} admin key(s) configured", config.admin_keys.len());
    }
}

/// Browsers must be allowed to send the signature headers.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-public-key"),
            HeaderName::from_static("x-signature"),
            HeaderName::from_static("x-timestamp"),
        ])
        .allow_origin(Any)
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Ctrl+C handler unavailable: {}", e);
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
                tracing::error!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, draining"),
        _ = terminate => tracing::info!("SIGTERM received, draining"),
    }

    state.signal_shutdown();
}
