use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::services::manager::ServiceManager;
use crate::services::otp_purge::OtpPurgeService;
use crate::services::signals::handle_shutdown_signals;
use crate::services::web::WebService;
use crate::state::AppState;
use crate::utils::fmt_duration;
use crate::web::auth::otp::normalize_phone;

const MAX_CONNECTIONS: u32 = 8;

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Connect to the database, apply migrations and build shared state.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let slow_threshold = Duration::from_millis(500);
        let connect_options = PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(MAX_CONNECTIONS)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            max_connections = MAX_CONNECTIONS,
            acquire_timeout = "4s",
            acquire_slow_threshold = fmt_duration(slow_threshold),
            "database pool established"
        );

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        if let Some(raw) = &config.admin_phone {
            let phone = normalize_phone(raw, &config.default_country_code)
                .context("ADMIN_PHONE is not a valid phone number")?;
            let user = crate::data::users::ensure_seed_admin(&db_pool, &phone)
                .await
                .context("Failed to seed admin user")?;
            info!(user_id = user.id, "Seed admin ensured");
        }

        let sms = crate::sms::from_config(&config).context("Failed to configure SMS sender")?;
        let app_state = AppState::new(&config, db_pool, Arc::from(sms));

        Ok(App {
            config,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    /// Register the web server and background services.
    pub fn setup_services(&mut self) {
        self.service_manager.register_service(Box::new(WebService::new(
            self.config.port,
            self.app_state.clone(),
        )));
        self.service_manager
            .register_service(Box::new(OtpPurgeService::new(
                self.app_state.db_pool.clone(),
                self.app_state.service_statuses.clone(),
            )));
    }

    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run until a shutdown signal or a service failure.
    pub async fn run(self) -> ExitCode {
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout()).await
    }
}
