use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use helpsl_api::state::{AppState, AppStateInner};
use helpsl_gateway::connection;
use helpsl_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helpsl=debug,helpsl_api=debug,helpsl_gateway=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("HELPSL_DB_PATH").unwrap_or_else(|_| "helpsl.db".into());
    let host = std::env::var("HELPSL_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("HELPSL_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = helpsl_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner::new(db, dispatcher.clone()));

    let realtime = Router::new()
        .route("/realtime", get(ws_upgrade))
        .with_state(dispatcher);

    let app = Router::new()
        .merge(helpsl_api::routes(app_state))
        .merge(realtime)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("HelpSL server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(dispatcher): State<Dispatcher>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}
