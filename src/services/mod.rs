//! Long-running services supervised by the [`manager::ServiceManager`].

use async_trait::async_trait;
use tokio::sync::broadcast;

pub mod manager;
pub mod otp_purge;
pub mod signals;
pub mod web;

#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Run until finished or until `shutdown_rx` fires, then clean up and return.
    async fn run(&mut self, shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()>;
}
