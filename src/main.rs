use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use problemdesk::{config::AppConfig, routes, session, state::AppState, throttle};

#[tokio::main]
async fn main() {
    // .env must be applied before AppConfig::from_env
    match dotenvy::dotenv() {
        Ok(_) | Err(dotenvy::Error::Io(_)) => {}
        Err(e) => eprintln!("Ignoring unreadable .env: {}", e),
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "problemdesk=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting problemdesk...");

    let config = AppConfig::from_env();
    let port = config.port;

    let state = match AppState::from_config(config).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!("Failed to initialize data directory: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        mailer = state.mailer.name(),
        data_dir = %state.config.data_dir.display(),
        "Application state ready"
    );

    session::spawn_session_sweeper(state.clone(), chrono::Duration::hours(24));
    if let Some(limiter) = state.login_limiter.clone() {
        throttle::spawn_limiter_cleanup(limiter);
    }

    let app = routes::router(state, "static");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("Server error: {}", e);
    }
}
