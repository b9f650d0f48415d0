// Social backend server

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use social_backend::{app_state::AppState, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let app_state = AppState::new(config.clone()).await?;

    let app = Router::new()
        .nest("/api/v1", app_state.router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.server_address();
    info!("Social backend listening on http://{}", addr);
    info!("  POST   /api/v1/users                                   - Create user");
    info!("  POST   /api/v1/users/{{username}}/posts                  - Create post");
    info!("  POST   /api/v1/users/{{username}}/posts/{{n}}/likes        - Like post");
    info!("  POST   /api/v1/users/{{username}}/posts/{{n}}/comments     - Comment on post");
    info!("  GET    /api/v1/users/{{username}}/notifications          - List notifications");
    info!("  POST   /api/v1/notifications                           - Create notification");
    info!("  PUT    /api/v1/notifications/{{id}}                      - Mark as read");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    app_state.shutdown().await;
    Ok(())
}
