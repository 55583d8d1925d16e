// =============================================================================
// gpv-syncd — Sync Service Entry Point
// =============================================================================
//
// Boots the companion edge service: authenticated opaque-blob storage with
// conflict detection. The service never holds a decryption key; everything
// it stores is ciphertext produced on the client.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gpv::config::ServiceConfig;
use gpv::server::{router, FileKv, KvStore, MemoryKv, ServiceState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("gpv-syncd starting up");

    let config = ServiceConfig::from_env()?;

    // ── 2. KV binding ────────────────────────────────────────────────────
    let kv: Arc<dyn KvStore> = match &config.kv_path {
        Some(path) => Arc::new(FileKv::open(path)?),
        None => {
            warn!("GPV_KV_PATH not set — records live in memory only");
            Arc::new(MemoryKv::new())
        }
    };

    // ── 3. Router & listener ─────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(ServiceState::new(config, kv));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {bind_addr}: {e}"))?;
    info!(addr = %bind_addr, "sync service listening");

    // ── 4. Serve until ctrl-c ────────────────────────────────────────────
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("shutdown signal received — draining connections");
        })
        .await?;

    info!("gpv-syncd shut down complete");
    Ok(())
}
