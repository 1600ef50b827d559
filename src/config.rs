//! Runtime configuration loaded from environment variables.

use anyhow::{Context, bail};
use figment::{Figment, providers::Env};
use serde::Deserialize;
use std::time::Duration;

/// Minimum accepted length of `JWT_SECRET`, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Upper bounds keep every duration and counter well inside the
/// `chrono`/`i32` ranges used at request time.
pub const MAX_JWT_TTL: u64 = 90 * 24 * 60 * 60;
pub const MAX_OTP_TTL: u64 = 60 * 60;
pub const MAX_OTP_RESEND_COOLDOWN: u64 = 60 * 60;
pub const MAX_OTP_ATTEMPTS: u32 = 20;
pub const MAX_OTP_HOURLY_LIMIT: u32 = 100;

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> u64 {
    8
}

fn default_jwt_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_otp_ttl() -> u64 {
    5 * 60
}

fn default_otp_resend_cooldown() -> u64 {
    60
}

fn default_otp_hourly_limit() -> u32 {
    5
}

fn default_otp_max_attempts() -> u32 {
    5
}

fn default_country_code() -> String {
    "1".to_string()
}

/// Where one-time codes are delivered.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmsProvider {
    /// Write the message to the log. Development only.
    #[default]
    Log,
    /// POST the message to an HTTP SMS gateway.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds to wait for background tasks during shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    pub jwt_secret: String,
    /// Session token lifetime in seconds.
    #[serde(default = "default_jwt_ttl")]
    pub jwt_ttl: u64,

    #[serde(default = "default_otp_ttl")]
    pub otp_ttl: u64,
    #[serde(default = "default_otp_resend_cooldown")]
    pub otp_resend_cooldown: u64,
    #[serde(default = "default_otp_hourly_limit")]
    pub otp_hourly_limit: u32,
    #[serde(default = "default_otp_max_attempts")]
    pub otp_max_attempts: u32,
    #[serde(default = "default_country_code")]
    pub default_country_code: String,

    #[serde(default)]
    pub sms_provider: SmsProvider,
    pub sms_api_url: Option<String>,
    pub sms_api_key: Option<String>,
    pub sms_sender: Option<String>,

    /// Phone number promoted to admin on startup.
    pub admin_phone: Option<String>,
    /// Browser origin allowed by CORS, e.g. `https://shop.example.com`.
    pub public_origin: Option<String>,
    /// Take the client address from `CF-Connecting-IP` / `X-Forwarded-For`.
    /// Only enable behind a proxy that overwrites those headers.
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Config {
    /// Extract the configuration from raw environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let config: Config = Figment::new()
            .merge(Env::raw())
            .extract()
            .context("Failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would fail later at request time.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} bytes");
        }
        if !(1..=MAX_JWT_TTL).contains(&self.jwt_ttl) {
            bail!("JWT_TTL must be between 1 and {MAX_JWT_TTL} seconds");
        }
        if !(1..=MAX_OTP_TTL).contains(&self.otp_ttl) {
            bail!("OTP_TTL must be between 1 and {MAX_OTP_TTL} seconds");
        }
        if self.otp_resend_cooldown > MAX_OTP_RESEND_COOLDOWN {
            bail!("OTP_RESEND_COOLDOWN must be at most {MAX_OTP_RESEND_COOLDOWN} seconds");
        }
        if !(1..=MAX_OTP_ATTEMPTS).contains(&self.otp_max_attempts) {
            bail!("OTP_MAX_ATTEMPTS must be between 1 and {MAX_OTP_ATTEMPTS}");
        }
        if !(1..=MAX_OTP_HOURLY_LIMIT).contains(&self.otp_hourly_limit) {
            bail!("OTP_HOURLY_LIMIT must be between 1 and {MAX_OTP_HOURLY_LIMIT}");
        }
        if self.default_country_code.is_empty()
            || self.default_country_code.len() > 3
            || !self.default_country_code.bytes().all(|b| b.is_ascii_digit())
        {
            bail!(
                "DEFAULT_COUNTRY_CODE must be 1-3 digits, got {:?}",
                self.default_country_code
            );
        }
        if self.sms_provider == SmsProvider::Http {
            let raw = self
                .sms_api_url
                .as_deref()
                .context("SMS_API_URL is required when SMS_PROVIDER=http")?;
            url::Url::parse(raw).context("SMS_API_URL is not a valid URL")?;
            if self.sms_api_key.is_none() {
                bail!("SMS_API_KEY is required when SMS_PROVIDER=http");
            }
        }
        if let Some(origin) = &self.public_origin {
            url::Url::parse(origin).context("PUBLIC_ORIGIN is not a valid URL")?;
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}
