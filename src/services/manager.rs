use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::services::Service;
use crate::utils::fmt_duration;

type ServiceHandle = JoinHandle<anyhow::Result<()>>;

/// Owns the registered services and their task handles.
pub struct ServiceManager {
    registered: Vec<Box<dyn Service>>,
    running: HashMap<&'static str, ServiceHandle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registered: Vec::new(),
            running: HashMap::new(),
            shutdown_tx,
        }
    }

    pub fn register_service(&mut self, service: Box<dyn Service>) {
        self.registered.push(service);
    }

    pub fn has_services(&self) -> bool {
        !self.registered.is_empty() || !self.running.is_empty()
    }

    /// Spawn every registered service on its own task.
    pub fn spawn_all(&mut self) {
        for mut service in self.registered.drain(..) {
            let name = service.name();
            let shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(async move { service.run(shutdown_rx).await });
            info!(service = name, "Service spawned");
            self.running.insert(name, handle);
        }
    }

    /// Wait for the first service to exit on its own.
    pub async fn run(&mut self) -> (&'static str, anyhow::Result<()>) {
        if self.running.is_empty() {
            return ("none", Err(anyhow::anyhow!("No services running")));
        }

        loop {
            let finished = self
                .running
                .iter()
                .find(|(_, handle)| handle.is_finished())
                .map(|(name, _)| *name);

            if let Some(name) = finished
                && let Some(handle) = self.running.remove(name)
            {
                let result = handle
                    .await
                    .unwrap_or_else(|e| Err(anyhow::anyhow!("Service task panicked: {e}")));
                return (name, result);
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal every running service and wait up to `timeout` for all of them.
    ///
    /// Returns the elapsed time, or the names of services that did not stop.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Duration, Vec<&'static str>> {
        let start = Instant::now();
        // No receivers left just means every service already exited.
        let _ = self.shutdown_tx.send(());

        let mut pending = Vec::new();
        for (name, handle) in self.running.drain() {
            let remaining = timeout.saturating_sub(start.elapsed());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(Ok(()))) => debug!(service = name, "Service stopped"),
                Ok(Ok(Err(e))) => error!(service = name, error = ?e, "Service failed during shutdown"),
                Ok(Err(e)) => error!(service = name, error = ?e, "Service task panicked"),
                Err(_) => {
                    warn!(
                        service = name,
                        timeout = fmt_duration(timeout),
                        "Service did not stop in time"
                    );
                    pending.push(name);
                }
            }
        }

        if pending.is_empty() {
            Ok(start.elapsed())
        } else {
            Err(pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Sleeper;

    #[async_trait]
    impl Service for Sleeper {
        fn name(&self) -> &'static str {
            "sleeper"
        }

        async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
            let _ = shutdown_rx.recv().await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Service for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&mut self, _shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn shutdown_stops_cooperative_services() {
        let mut manager = ServiceManager::new();
        manager.register_service(Box::new(Sleeper));
        manager.spawn_all();
        assert!(manager.has_services());
        assert!(manager.shutdown(Duration::from_secs(1)).await.is_ok());
        assert!(!manager.has_services());
    }

    #[tokio::test]
    async fn run_reports_first_failure() {
        let mut manager = ServiceManager::new();
        manager.register_service(Box::new(Sleeper));
        manager.register_service(Box::new(Failing));
        manager.spawn_all();

        let (name, result) = manager.run().await;
        assert_eq!(name, "failing");
        assert!(result.is_err());
        assert!(manager.shutdown(Duration::from_secs(1)).await.is_ok());
    }
}
