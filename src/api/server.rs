//! API server lifecycle: bind → spawn → graceful shutdown handle.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::api::router::api_router;
use crate::service::PlatformService;

/// Handle to a running API server.
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ApiServer {
    /// Shut down the server gracefully.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }
}

/// Bind the listener, spawn the server task, and return its handle.
pub async fn start_api_server(
    service: Arc<PlatformService>,
    bind_addr: &str,
) -> Result<ApiServer, String> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("Failed to bind API server on {bind_addr}: {e}"))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read server address: {e}"))?;

    let app = api_router(service);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(%addr, "API server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("API server error: {e}");
        }

        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AiBridge, BridgeConfig, MockLlmClient};
    use crate::config::Config;
    use crate::reconciler::BridgeReconciler;
    use crate::store::RecordStore;

    fn test_service() -> Arc<PlatformService> {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let bridge = Arc::new(AiBridge::new(
            Arc::new(MockLlmClient::new("draft")),
            BridgeConfig::default(),
        ));
        let reconciler = Arc::new(BridgeReconciler::new(Arc::clone(&store), "s".into(), 24));
        Arc::new(PlatformService::new(
            store,
            bridge,
            reconciler,
            Config::default(),
        ))
    }

    #[tokio::test]
    async fn start_serve_and_stop() {
        let mut server = start_api_server(test_service(), "127.0.0.1:0")
            .await
            .expect("server should start");
        assert!(server.addr.port() > 0);

        let url = format!("http://{}/api/health", server.addr);
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        server.shutdown();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let mut server = start_api_server(test_service(), "127.0.0.1:0")
            .await
            .expect("server should start");
        server.shutdown();
        server.shutdown();
    }

    #[tokio::test]
    async fn bad_bind_address_errors() {
        let result = start_api_server(test_service(), "999.999.999.999:1").await;
        assert!(result.is_err());
    }
}
