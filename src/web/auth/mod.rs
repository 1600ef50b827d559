//! Phone + one-time-code login and session endpoints.

pub mod extractors;
pub mod jwt;
pub mod otp;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use ts_rs::TS;

use crate::config::{Config, MAX_OTP_TTL};
use crate::data;
use crate::state::AppState;
use crate::web::account::UserResponse;
use crate::web::error::{ApiError, ApiErrorCode, db_error};
use extractors::AuthUser;

/// OTP policy derived from configuration.
#[derive(Debug, Clone)]
pub struct OtpSettings {
    pub ttl_secs: u64,
    pub resend_cooldown_secs: u64,
    pub hourly_limit: u32,
    pub max_attempts: u32,
    pub default_country_code: String,
}

impl OtpSettings {
    /// Code lifetime. `Config::validate` keeps `ttl_secs` within an hour.
    pub fn ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.ttl_secs.min(MAX_OTP_TTL)).unwrap_or(0);
        chrono::Duration::seconds(secs)
    }

    pub fn max_attempts_i32(&self) -> i32 {
        i32::try_from(self.max_attempts).unwrap_or(i32::MAX)
    }
}

impl From<&Config> for OtpSettings {
    fn from(config: &Config) -> Self {
        Self {
            ttl_secs: config.otp_ttl,
            resend_cooldown_secs: config.otp_resend_cooldown,
            hourly_limit: config.otp_hourly_limit,
            max_attempts: config.otp_max_attempts,
            default_country_code: config.default_country_code.clone(),
        }
    }
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct OtpRequestBody {
    pub phone: String,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OtpRequestResponse {
    pub sent: bool,
    /// Seconds until the code expires.
    pub expires_in: u64,
    /// Seconds before another code may be requested.
    pub retry_after: u64,
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct OtpVerifyBody {
    pub phone: String,
    pub code: String,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserResponse,
}

/// Seconds a caller must wait before requesting another code, if any.
pub fn cooldown_remaining(
    history: &data::otp::RequestHistory,
    settings: &OtpSettings,
    now: chrono::DateTime<Utc>,
) -> Option<u64> {
    if history.last_hour >= i64::from(settings.hourly_limit) {
        // Conservative: the oldest request in the window is at most an hour old.
        return Some(60 * 60);
    }
    let latest = history.latest?;
    let elapsed = (now - latest).num_seconds().max(0) as u64;
    (elapsed < settings.resend_cooldown_secs).then(|| settings.resend_cooldown_secs - elapsed)
}

/// `POST /api/auth/otp/request` -- Text a login code to a phone number.
#[instrument(skip_all)]
pub async fn request_code(
    State(state): State<AppState>,
    Json(body): Json<OtpRequestBody>,
) -> Result<Json<OtpRequestResponse>, ApiError> {
    let settings = &state.otp;
    let phone = otp::normalize_phone(&body.phone, &settings.default_country_code)?;

    let history = data::otp::request_history(&state.db_pool, &phone)
        .await
        .map_err(|e| db_error("OTP history lookup", e))?;
    if let Some(wait) = cooldown_remaining(&history, settings, Utc::now()) {
        return Err(ApiError::new(
            ApiErrorCode::OtpCooldown,
            format!("please wait {wait} seconds before requesting another code"),
        )
        .with_details(json!({ "retryAfter": wait })));
    }

    let code = otp::generate_code();
    let hash = otp::hash_code(state.secret.as_bytes(), &phone, &code);
    let expires_at = Utc::now() + settings.ttl();

    let code_id = data::otp::insert_code(&state.db_pool, &phone, &hash, expires_at)
        .await
        .map_err(|e| db_error("Store OTP", e))?;

    let message = otp::message_body(&code, settings.ttl_secs.div_ceil(60));
    if let Err(e) = state.sms.send(&phone, &message).await {
        error!(error = %e, "Failed to deliver OTP");
        if let Err(e) = data::otp::delete_code(&state.db_pool, code_id).await {
            warn!(error = ?e, code_id, "Failed to delete undelivered OTP");
        }
        return Err(ApiError::new(
            ApiErrorCode::SmsFailed,
            "could not send the verification SMS, try again later",
        ));
    }

    // Only now that the new code is on its way do earlier ones stop working.
    let retired = data::otp::retire_older_codes(&state.db_pool, &phone, code_id)
        .await
        .map_err(|e| db_error("Retire old OTPs", e))?;

    info!(code_id, retired, "OTP sent");

    Ok(Json(OtpRequestResponse {
        sent: true,
        expires_in: settings.ttl_secs,
        retry_after: settings.resend_cooldown_secs,
    }))
}

/// `POST /api/auth/otp/verify` -- Exchange a code for a session token.
#[instrument(skip_all)]
pub async fn verify_code(
    State(state): State<AppState>,
    Json(body): Json<OtpVerifyBody>,
) -> Result<Json<SessionResponse>, ApiError> {
    let settings = &state.otp;
    let phone = otp::normalize_phone(&body.phone, &settings.default_country_code)?;
    let code = body.code.trim();
    if !otp::is_well_formed(code) {
        return Err(ApiError::validation(format!(
            "code must be {} digits",
            otp::CODE_LEN
        )));
    }

    let stored = data::otp::latest_open_code(&state.db_pool, &phone)
        .await
        .map_err(|e| db_error("OTP lookup", e))?
        .filter(|c| c.expires_at > Utc::now())
        .ok_or_else(|| {
            ApiError::new(
                ApiErrorCode::OtpExpired,
                "no valid code for this number, request a new one",
            )
        })?;

    let max_attempts = settings.max_attempts_i32();
    let attempts = data::otp::reserve_attempt(&state.db_pool, stored.id, max_attempts)
        .await
        .map_err(|e| db_error("Reserve OTP attempt", e))?
        .ok_or_else(|| {
            ApiError::new(
                ApiErrorCode::OtpLocked,
                "too many wrong attempts, request a new code",
            )
        })?;

    if !otp::verify_code(state.secret.as_bytes(), &phone, code, &stored.code_hash) {
        let remaining = (max_attempts - attempts).max(0);
        warn!(code_id = stored.id, attempts, "Wrong OTP entered");
        return Err(
            ApiError::new(ApiErrorCode::OtpInvalid, "incorrect code")
                .with_details(json!({ "remaining": remaining })),
        );
    }

    let consumed = data::otp::consume_code(&state.db_pool, stored.id)
        .await
        .map_err(|e| db_error("Consume OTP", e))?;
    if !consumed {
        return Err(ApiError::new(
            ApiErrorCode::OtpExpired,
            "code was already used, request a new one",
        ));
    }

    let user = data::users::upsert_on_login(&state.db_pool, &phone)
        .await
        .map_err(|e| db_error("Login user", e))?;
    if !user.is_active {
        warn!(user_id = user.id, "Deactivated account attempted login");
        return Err(ApiError::forbidden("this account has been deactivated"));
    }

    let issued = state.jwt.issue(&user).map_err(|e| {
        error!(error = %e, "Failed to sign session token");
        ApiError::internal_error("failed to create session")
    })?;

    info!(user_id = user.id, "User logged in");

    Ok(Json(SessionResponse {
        token: issued.token,
        expires_at: issued.expires_at.to_rfc3339(),
        user: UserResponse::from(&user),
    }))
}

/// `GET /api/auth/me` -- The current user.
pub async fn me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}

/// `POST /api/auth/logout` -- Revoke every token issued to the current user.
#[instrument(skip_all)]
pub async fn logout(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    data::users::bump_token_version(&state.db_pool, user.id)
        .await
        .map_err(|e| db_error("Logout", e))?;
    info!(user_id = user.id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}
