use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use farmlab_sim::{router, FarmSim};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8600".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .expect("failed to bind sim port");
    tracing::info!("farm sim listening on http://{addr}");

    let sim = Arc::new(RwLock::new(FarmSim::new()));
    axum::serve(listener, router(sim))
        .await
        .expect("sim server error");
}
