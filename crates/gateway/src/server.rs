use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{DefaultBodyLimit, State},
        response::{IntoResponse, Json},
        routing::{delete, get, post},
    },
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
    wagate_config::WagateConfig,
    wagate_tenants::SqliteTenantStore,
    wagate_whatsapp::BridgeFactory,
};

use crate::{routes, state::GatewayState, supervisor::ConnectionSupervisor};

/// Base64 media uploads outgrow axum's 2 MB default.
const MEDIA_BODY_LIMIT: usize = 64 * 1024 * 1024;

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the HTTP router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let app_state = AppState { gateway: state };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/session/connect", post(routes::session::connect))
        .route("/session/disconnect", post(routes::session::disconnect))
        .route("/session/logout", post(routes::session::logout))
        .route("/session/status", get(routes::session::status))
        .route("/session/qr", get(routes::session::qr))
        .route("/session/pairphone", post(routes::session::pair_phone))
        .route("/session/events", get(routes::session::events))
        .route("/chat/send/text", post(routes::chat::send_text))
        .route(
            "/chat/send/media",
            post(routes::chat::send_media).layer(DefaultBodyLimit::max(MEDIA_BODY_LIMIT)),
        )
        .route("/chat/presence", post(routes::chat::chat_presence))
        .route("/chat/markread", post(routes::chat::mark_read))
        .route("/chat/download", post(routes::chat::download))
        .route("/user/presence", post(routes::user::presence))
        .route("/user/check", post(routes::user::check))
        .route(
            "/webhook",
            get(routes::webhook::get_webhook)
                .put(routes::webhook::set_webhook)
                .delete(routes::webhook::delete_webhook),
        )
        .route(
            "/admin/users",
            get(routes::admin::list_users).post(routes::admin::add_user),
        )
        .route("/admin/users/{id}", delete(routes::admin::delete_user))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the gateway: open storage, resume sessions, serve until a shutdown
/// signal, then stop every session.
pub async fn start_gateway(config: WagateConfig) -> anyhow::Result<()> {
    let db_path = config.storage.database_path();
    let store = Arc::new(SqliteTenantStore::open(&db_path).await?);
    let factory = Arc::new(BridgeFactory::new(
        &config.bridge.url,
        Duration::from_secs(config.bridge.request_timeout_secs),
    )?);
    let state = GatewayState::new(config, store, factory);
    let app = build_gateway_app(Arc::clone(&state));

    let server = &state.config.server;
    let addr: SocketAddr = format!("{}:{}", server.bind, server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("wagate gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("database: {}", db_path.display()),
        format!("protocol bridge: {}", state.config.bridge.url),
        format!(
            "admin api: {}",
            if state.admin_token().is_some() {
                "enabled"
            } else {
                "disabled (no admin token)"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let background = CancellationToken::new();
    let sweeper = state
        .auth_cache
        .spawn_sweeper(state.config.auth.cache_sweep(), background.clone());

    if state.config.sessions.connect_on_startup {
        let supervisor = ConnectionSupervisor::new(Arc::clone(&state.sessions));
        tokio::spawn(async move {
            supervisor.connect_on_startup().await;
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    background.cancel();
    let _ = sweeper.await;
    let abandoned = state
        .sessions
        .shutdown(state.config.sessions.shutdown_deadline())
        .await;
    if !abandoned.is_empty() {
        warn!(count = abandoned.len(), "exiting with sessions still open");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "sessions": state.gateway.sessions.active().len(),
        "uptimeSecs": state.gateway.uptime_secs(),
    }))
}
