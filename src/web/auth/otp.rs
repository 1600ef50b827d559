//! Phone normalization and one-time code hashing.
//!
//! Codes are never stored in clear. The database holds
//! `hex(HMAC-SHA256(secret, "otp:{phone}:{code}"))` and verification
//! recomputes the MAC and compares in constant time.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of digits in a login code.
pub const CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number contains invalid characters")]
    InvalidCharacters,
    #[error("phone number must have 8 to 15 digits including the country code")]
    BadLength,
    #[error("country code cannot start with 0")]
    LeadingZero,
}

/// Normalize user input to E.164 (`+` followed by 8–15 digits).
///
/// Spaces, dashes, dots and parentheses are ignored. A `00` prefix is read as
/// `+`. Numbers without either get `default_country_code` prepended.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }

    let (international, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(PhoneError::InvalidCharacters),
        }
    }

    let full = if international {
        digits
    } else if let Some(stripped) = digits.strip_prefix("00") {
        stripped.to_string()
    } else {
        // Some national formats write a trunk `0` before the subscriber number.
        let national = digits.trim_start_matches('0');
        format!("{default_country_code}{national}")
    };

    if full.starts_with('0') {
        return Err(PhoneError::LeadingZero);
    }
    if !(8..=15).contains(&full.len()) {
        return Err(PhoneError::BadLength);
    }
    Ok(format!("+{full}"))
}

/// A uniformly random zero-padded code.
pub fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{n:06}")
}

/// Whether `code` has the shape of a login code.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

fn mac_for(secret: &[u8], phone: &str, code: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(b"otp:");
    mac.update(phone.as_bytes());
    mac.update(b":");
    mac.update(code.as_bytes());
    mac
}

/// Hex digest stored for `code` issued to `phone`.
pub fn hash_code(secret: &[u8], phone: &str, code: &str) -> String {
    hex::encode(mac_for(secret, phone, code).finalize().into_bytes())
}

/// Constant-time check of `code` against a stored digest.
pub fn verify_code(secret: &[u8], phone: &str, code: &str, stored_hash: &str) -> bool {
    let Ok(expected) = hex::decode(stored_hash) else {
        return false;
    };
    mac_for(secret, phone, code).verify_slice(&expected).is_ok()
}

/// SMS body for a login code.
pub fn message_body(code: &str, ttl_minutes: u64) -> String {
    format!("Your login code is {code}. It expires in {ttl_minutes} minutes. Never share this code.")
}
