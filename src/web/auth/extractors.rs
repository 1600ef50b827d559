//! Axum extractors for authenticated requests.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use http::request::Parts;
use tracing::{debug, warn};

use crate::data::models::User;
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};

/// A logged-in, active user.
pub struct AuthUser(pub User);

/// A logged-in, active admin.
pub struct AdminUser(pub User);

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

        let claims = state.jwt.verify(token).map_err(|e| {
            debug!(error = %e, "Rejected session token");
            ApiError::unauthorized("invalid or expired token")
        })?;
        let user_id = claims
            .user_id()
            .ok_or_else(|| ApiError::unauthorized("invalid or expired token"))?;

        let user = crate::data::users::get_user(&state.db_pool, user_id)
            .await
            .map_err(|e| db_error("Load session user", e))?
            .ok_or_else(|| ApiError::unauthorized("account no longer exists"))?;

        if user.token_version != claims.ver {
            return Err(ApiError::unauthorized("session has been revoked"));
        }
        if !user.is_active {
            warn!(user_id = user.id, "Token presented for deactivated account");
            return Err(ApiError::unauthorized("account is deactivated"));
        }

        Ok(AuthUser(user))
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            warn!(user_id = user.id, path = %parts.uri.path(), "Non-admin hit admin endpoint");
            return Err(ApiError::forbidden("admin access required"));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/account");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_bearer_token() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc.def.ghi"))), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&parts_with(Some("bearer  abc "))), Some("abc"));
    }

    #[test]
    fn ignores_other_schemes_and_blanks() {
        assert_eq!(bearer_token(&parts_with(None)), None);
        assert_eq!(bearer_token(&parts_with(Some("Basic dXNlcjpwdw=="))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer"))), None);
    }
}
