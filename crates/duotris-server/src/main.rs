use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duotris_server::config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duotris_server=info,duotris_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::from_env();
    let addr = format!("{}:{}", config.host, config.port);

    if config.bypass_auth {
        tracing::warn!("BYPASS_AUTH is enabled; every request gets a fresh test identity");
    }

    let (app, state) = duotris_server::build_app(config).await;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");
    tracing::info!(%addr, "listening");

    let manager = state.manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            manager.shutdown();
        })
        .await
        .expect("Server error");
}
