//! HS256 session tokens.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::data::enums::Role;
use crate::data::models::User;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a decimal string.
    pub sub: String,
    pub role: Role,
    /// The user's token version at issue time; bumping it revokes the token.
    pub ver: i32,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// A freshly signed token and its expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signing and verification keys derived from `JWT_SECRET`.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtKeys").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 5;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn issue(&self, user: &User) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        self.issue_at(user, Utc::now())
    }

    pub fn issue_at(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let expires_at = now
            + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(7));
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role,
            ver: user.token_version,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Check signature and expiry and return the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::new(b"test-secret-test-secret-test-secret", Duration::from_secs(3600))
    }

    fn user(role: Role) -> User {
        User {
            id: 42,
            phone: "+14155550132".into(),
            display_name: None,
            email: None,
            delivery_address: None,
            role,
            is_active: true,
            token_balance: 0,
            token_version: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        }
    }

    #[test]
    fn issued_token_verifies() {
        let keys = keys();
        let issued = keys.issue(&user(Role::Admin)).unwrap();
        let claims = keys.verify(&issued.token).unwrap();
        assert_eq!(claims.user_id(), Some(42));
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.ver, 3);
        assert_eq!(claims.exp, issued.expires_at.timestamp());
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = keys();
        let long_ago = Utc::now() - chrono::Duration::days(2);
        let issued = keys.issue_at(&user(Role::Subscriber), long_ago).unwrap();
        assert!(keys.verify(&issued.token).is_err());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = JwtKeys::new(b"some-other-secret-some-other-secret", Duration::from_secs(3600));
        let issued = other.issue(&user(Role::Subscriber)).unwrap();
        assert!(keys().verify(&issued.token).is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let keys = keys();
        let issued = keys.issue(&user(Role::Subscriber)).unwrap();
        let mut parts: Vec<&str> = issued.token.split('.').collect();
        let forged = keys.issue(&User { id: 1, ..user(Role::Admin) }).unwrap();
        let forged_payload = forged.token.split('.').nth(1).unwrap().to_string();
        parts[1] = &forged_payload;
        assert!(keys.verify(&parts.join(".")).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(keys().verify("not.a.jwt").is_err());
        assert!(keys().verify("").is_err());
    }
}
