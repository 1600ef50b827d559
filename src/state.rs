//! Application state shared by the web layer and background services.

use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ts_rs::TS;

use crate::config::Config;
use crate::sms::SmsSender;
use crate::web::auth::OtpSettings;
use crate::web::auth::jwt::JwtKeys;

/// Health status of a service.
#[derive(Debug, Clone, Serialize, PartialEq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ServiceStatus {
    Starting,
    Active,
    Connected,
    Disabled,
    Error,
}

/// A timestamped status entry for a service.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the status for a named service.
    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| entry.status.clone())
    }

    /// Snapshot of all statuses, sorted by service name.
    pub fn all(&self) -> Vec<(String, ServiceStatus)> {
        let mut entries: Vec<_> = self
            .inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// How long ago a service last reported.
    pub fn age(&self, name: &str) -> Option<Duration> {
        self.inner.get(name).map(|entry| entry.updated_at.elapsed())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub jwt: JwtKeys,
    /// Keys one-time code hashes. Shares `JWT_SECRET`, separated by a message prefix.
    pub secret: Arc<str>,
    pub otp: Arc<OtpSettings>,
    pub sms: Arc<dyn SmsSender>,
    pub service_statuses: ServiceStatusRegistry,
    pub public_origin: Option<String>,
    pub trust_proxy: bool,
}

impl AppState {
    pub fn new(config: &Config, db_pool: PgPool, sms: Arc<dyn SmsSender>) -> Self {
        Self {
            db_pool,
            jwt: JwtKeys::new(
                config.jwt_secret.as_bytes(),
                Duration::from_secs(config.jwt_ttl),
            ),
            secret: Arc::from(config.jwt_secret.as_str()),
            otp: Arc::new(OtpSettings::from(config)),
            sms,
            service_statuses: ServiceStatusRegistry::new(),
            public_origin: config.public_origin.clone(),
            trust_proxy: config.trust_proxy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_overwrites_and_sorts() {
        let registry = ServiceStatusRegistry::new();
        registry.set("web", ServiceStatus::Starting);
        registry.set("otp_purge", ServiceStatus::Active);
        registry.set("web", ServiceStatus::Active);

        assert_eq!(registry.get("web"), Some(ServiceStatus::Active));
        assert_eq!(registry.get("missing"), None);
        let names: Vec<_> = registry.all().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["otp_purge", "web"]);
        assert!(registry.age("web").is_some());
    }
}
