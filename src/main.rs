use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use trustcare::api::server::start_api_server;
use trustcare::bridge::{AiBridge, HttpLlmClient};
use trustcare::config::{self, Config};
use trustcare::reconciler::BridgeReconciler;
use trustcare::service::PlatformService;
use trustcare::store::RecordStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let cfg = Config::from_env();
    if cfg.bridge_shared_secret.is_empty() {
        tracing::warn!("TRUSTCARE_BRIDGE_SECRET is unset; webhook updates will be rejected");
    }

    let store = Arc::new(RecordStore::open(&cfg.db_path)?);

    let client = HttpLlmClient::new(
        &cfg.llm_base_url,
        cfg.llm_api_key.clone(),
        cfg.bridge_timeout_s,
    );
    let bridge = Arc::new(AiBridge::new(Arc::new(client), cfg.bridge_config()));

    let reconciler = Arc::new(BridgeReconciler::new(
        Arc::clone(&store),
        cfg.bridge_shared_secret.clone(),
        cfg.bridge_stale_threshold_h,
    ));
    let _sweeper = Arc::clone(&reconciler).spawn_sweeper(cfg.bridge_sweep_interval_s);
    let _retention = spawn_audit_retention(Arc::clone(&store), cfg.audit_retention_days);

    let bind_addr = cfg.bind_addr.clone();
    let service = Arc::new(PlatformService::new(store, bridge, reconciler, cfg));

    let mut server = start_api_server(service, &bind_addr).await?;
    tracing::info!(addr = %server.addr, "TrustCare is up");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    server.shutdown();
    Ok(())
}

/// Prune audit entries past the retention window, once a day.
fn spawn_audit_retention(
    store: Arc<RecordStore>,
    retention_days: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days.max(90));
            match store.prune_audit(cutoff) {
                Ok(0) => {}
                Ok(pruned) => tracing::info!(pruned, "audit retention pruned old entries"),
                Err(e) => tracing::error!(error = %e, "audit retention pruning failed"),
            }
        }
    })
}
