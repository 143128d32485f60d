//! Session management
//!
//! Uses HMAC-signed tokens carried in a Bearer header or cookie.
//! No server-side session storage needed; tokens are issued by the
//! account service that owns sign-in.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// User session data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Account id of the signed-in user
    pub user_id: String,
    /// When session was created
    pub created_at: DateTime<Utc>,
    /// When session expires
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// New session valid for `max_age_seconds`
    pub fn new(user_id: impl Into<String>, max_age_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            created_at: now,
            expires_at: now + Duration::seconds(max_age_seconds),
        }
    }

    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

type HmacSha256 = hmac::Hmac<sha2::Sha256>;

/// Create a signed session token
///
/// Token format: base64(payload).base64(hmac_sha256(payload))
pub fn create_session_token(session: &Session, secret: &str) -> Result<String, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::Mac;

    // 1. Serialize session to JSON
    let payload = serde_json::to_string(session).map_err(|e| AppError::Internal(e.into()))?;

    // 2. Base64 encode the payload
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes());

    // 3. Create HMAC-SHA256 signature
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid session secret: {}", e)))?;
    mac.update(payload_b64.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    // 4. Return "{payload}.{signature}"
    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify and decode a session token
///
/// # Errors
/// `Unauthorized` if the token is malformed, tampered with or expired
pub fn verify_session_token(token: &str, secret: &str) -> Result<Session, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::Mac;

    // 1. Split token into payload and signature
    let (payload_b64, signature_b64) = token.split_once('.').ok_or(AppError::Unauthorized)?;
    if signature_b64.contains('.') {
        return Err(AppError::Unauthorized);
    }

    // 2. Verify HMAC signature
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid session secret: {}", e)))?;
    mac.update(payload_b64.as_bytes());

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;
    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    // 3. Decode and deserialize payload
    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::Unauthorized)?;
    let session: Session =
        serde_json::from_slice(&payload_bytes).map_err(|_| AppError::Unauthorized)?;

    // 4. Check if session is expired
    if session.is_expired() {
        return Err(AppError::Unauthorized);
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn token_round_trips() {
        let session = Session::new("alice", 3600);
        let token = create_session_token(&session, SECRET).unwrap();

        let verified = verify_session_token(&token, SECRET).unwrap();
        assert_eq!(verified.user_id, "alice");
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = create_session_token(&Session::new("alice", 3600), SECRET).unwrap();
        let forged_payload = {
            use base64::{Engine as _, engine::general_purpose};
            let forged = Session::new("mallory", 3600);
            general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap())
        };
        let signature = token.split_once('.').unwrap().1;

        let result = verify_session_token(&format!("{}.{}", forged_payload, signature), SECRET);
        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = create_session_token(&Session::new("alice", -10), SECRET).unwrap();
        assert!(matches!(
            verify_session_token(&token, SECRET),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_session_token(&Session::new("alice", 3600), SECRET).unwrap();
        assert!(verify_session_token(&token, "another-secret-another-secret-00").is_err());
    }
}
