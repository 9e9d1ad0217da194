//! nlsql HTTP server
//!
//! Serves the query pipeline over REST. Configuration comes from the
//! environment (see the nlsql-agentic crate docs for the variables).

use std::net::SocketAddr;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nlsql::api::{create_api_router, ApiState};
use nlsql_agentic::orchestrator::QueryOrchestrator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nlsql=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let orchestrator = QueryOrchestrator::from_env()?;
    tracing::info!(
        provider = orchestrator.provider_name(),
        model = orchestrator.model_name(),
        "query pipeline ready"
    );

    let state = ApiState::new(orchestrator);

    // The chat frontend is served from another origin during
    // development, so the API stays wide open.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_api_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let port: u16 = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("nlsql server listening on http://{}", addr);
    tracing::info!("  POST /api/query       - answer a business question with SQL");
    tracing::info!("  POST /api/refine      - refine a previous query with feedback");
    tracing::info!("  POST /api/token-usage - estimate prompt cost for a text");
    tracing::info!("  GET  /api/health      - service health and active model");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            eprintln!("Port {} is already in use. Set SERVER_PORT to pick another port.", port);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    axum::serve(listener, app).await?;
    Ok(())
}
