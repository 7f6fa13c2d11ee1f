use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use tulong_api::auth::{self, AppState, AppStateInner};
use tulong_api::middleware::require_auth;
use tulong_api::storage::AvatarStorage;
use tulong_api::{conversations, errands, profiles, reports};
use tulong_gateway::connection;
use tulong_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tulong=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("TULONG_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("TULONG_DB_PATH").unwrap_or_else(|_| "tulong.db".into());
    let avatar_dir = std::env::var("TULONG_AVATAR_DIR").unwrap_or_else(|_| "avatars".into());
    let host = std::env::var("TULONG_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("TULONG_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database and avatar storage
    let db = Arc::new(tulong_db::Database::open(&PathBuf::from(&db_path))?);
    let avatars = AvatarStorage::new(PathBuf::from(&avatar_dir)).await?;
    let avatar_root = avatars.dir().clone();

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        avatars,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/errands", get(errands::list_errands).post(errands::post_errand))
        .route("/errands/{errand_id}", get(errands::get_errand))
        .route("/errands/{errand_id}/accept", post(errands::accept_errand))
        .route("/errands/{errand_id}/status", post(errands::update_status))
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route(
            "/profiles/me",
            get(profiles::get_me).put(profiles::update_me),
        )
        .route("/profiles/me/avatar", put(profiles::upload_avatar))
        .route("/me/stats", get(profiles::get_stats))
        .route("/me/transactions", get(profiles::list_transactions))
        .route("/reports", post(reports::create_report))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/avatars", ServeDir::new(avatar_root))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Tulong server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
