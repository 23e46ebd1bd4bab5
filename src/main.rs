use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path};
use axum::{routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use chaintreed::config::{get_global_config, init_global_config};
use chaintreed::crypto::HashSigner;
use chaintreed::engine::{status_of, ChainEngine};
use chaintreed::network::BroadcastNetwork;
use chaintreed::store::{ChainStore, InMemoryChainStore, ReliabilityStore, RocksDbReliabilityStore};
use chaintreed::telemetry::TelemetryConfig;
use chaintreed::{metrics, telemetry};

async fn status_handler(
    Extension(engine): Extension<Arc<ChainEngine>>,
    Path(chain): Path<u64>,
) -> Json<serde_json::Value> {
    let status = status_of(&engine, chain);
    Json(serde_json::json!({
        "chain": status.chain,
        "last_index": status.last_index,
        "has_forward_candidate": status.has_forward_candidate,
    }))
}

async fn metrics_handler() -> String {
    metrics::gather()
}

async fn start_web_server(engine: Arc<ChainEngine>) {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/status/{chain}", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(Extension(engine));

    let addr = SocketAddr::from(([0, 0, 0, 0], 3005));
    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind status server");
    info!(%addr, "status server listening");
    axum::serve(listener, app).await.expect("status server failed");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing(TelemetryConfig::default())?;
    metrics::register_all()?;

    init_global_config("config.toml")?;
    let config = get_global_config().clone();

    let rel_db_path = shellexpand::tilde("~/.chaintreed/reliability").into_owned();
    let rel_store: Arc<dyn ReliabilityStore> = Arc::new(RocksDbReliabilityStore::open(&rel_db_path)?);

    // The chain block store is an out-of-scope collaborator; a real
    // deployment wires a persistent implementation here.
    let chain_store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());

    let network = BroadcastNetwork::new();
    let signer: Arc<dyn chaintreed::crypto::Signer> = Arc::new(HashSigner);

    let engine = ChainEngine::new(chain_store, rel_store, network as Arc<dyn chaintreed::network::Network>, signer, config);

    let web_engine = engine.clone();
    tokio::spawn(async move {
        start_web_server(web_engine).await;
    });

    let scheduler_engine = engine.clone();
    tokio::spawn(async move {
        scheduler_engine.run_scheduler().await;
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    warn!("chaintreed started with an in-memory chain store; no block data will survive a restart");

    // Keep the process alive; real peer-network wiring will drive the
    // engine's enqueue() calls instead of leaving it to the scheduler alone.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
