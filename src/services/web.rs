//! HTTP server service.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, trace};

use crate::services::Service;
use crate::state::{AppState, ServiceStatus};
use crate::web::create_router;

pub const SERVICE_NAME: &str = "web";

pub struct WebService {
    port: u16,
    app_state: AppState,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState) -> Self {
        Self { port, app_state }
    }
}

#[async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let statuses = self.app_state.service_statuses.clone();
        statuses.set(SERVICE_NAME, ServiceStatus::Starting);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await.inspect_err(|_| {
            statuses.set(SERVICE_NAME, ServiceStatus::Error);
        })?;
        info!(address = %addr, "Web server listening");
        statuses.set(SERVICE_NAME, ServiceStatus::Active);

        let app = create_router(self.app_state.clone());
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            trace!("Web server draining connections");
        })
        .await?;

        statuses.set(SERVICE_NAME, ServiceStatus::Disabled);
        info!("Web server stopped");
        Ok(())
    }
}
