use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit_sentinel::alert::{AlertSink, LogAlertSink, WebhookAlertSink};
use audit_sentinel::audit::{AuditStore, AuditWriter, ChainHasher};
use audit_sentinel::config::AppConfig;
use audit_sentinel::threat::{threat_middleware, MemoryRiskStore, ThreatGuard, ThreatScorer};

#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
    store: AuditStore,
    writer: Arc<AuditWriter>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_sentinel=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting audit sentinel");

    let config = AppConfig::load()?;
    config.validate()?;
    info!("Configuration loaded");

    let store = AuditStore::connect(&config.database_url).await?;
    store.run_migrations().await?;
    info!("Database connected, migrations completed");

    let hasher = ChainHasher::new(&config.signature)?;
    let writer = Arc::new(AuditWriter::new(store.clone(), hasher));
    info!(
        signing = config.signature.enabled,
        "Audit writer initialized"
    );

    let scorer = ThreatScorer::new(config.threat.clone())?;
    let risk = Arc::new(MemoryRiskStore::new());
    let alerts: Arc<dyn AlertSink> = match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url.clone())),
        None => Arc::new(LogAlertSink),
    };
    let guard = Arc::new(ThreatGuard::new(scorer, risk, writer.clone(), alerts));
    info!(
        threat_enabled = config.threat.enabled,
        auto_block = config.threat.auto_block,
        "Threat detection initialized"
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        writer,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    guard,
                    threat_middleware,
                ))
                .into_inner(),
        )
        .with_state(state);

    let addr = SocketAddr::new(config.server_host.parse()?, config.server_port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "audit-sentinel",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut status = serde_json::json!({
        "status": "healthy",
        "service": "audit-sentinel",
        "timestamp": chrono::Utc::now(),
        "features": {
            "threat_detection": state.config.threat.enabled,
            "auto_block": state.config.threat.auto_block,
            "signatures": state.config.signature.enabled,
        }
    });

    match state.store.count().await {
        Ok(count) => {
            status["chain"] = serde_json::json!({
                "records": count,
                "head": state.store.last_chain_hash().await.ok().flatten(),
            });
        }
        Err(_) => {
            status["chain"] = serde_json::json!({ "status": "error" });
        }
    }

    status["dashboard_listeners"] = serde_json::json!(state.writer.listeners());

    Json(status)
}
