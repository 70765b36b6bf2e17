use std::sync::Arc;

use axum::http::{HeaderMap, header};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use teamboard_types::api::Claims;

use crate::error::AdmissionError;

/// Signs and verifies session tokens. The REST middleware and the realtime
/// handshake share one instance, so both accept exactly the same tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    keys: Arc<Keys>,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            keys: Arc::new(Keys {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
                validation: Validation::default(),
            }),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AdmissionError> {
        decode::<Claims>(token, &self.keys.decoding, &self.keys.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AdmissionError::Expired,
                _ => AdmissionError::InvalidToken(e),
            })
    }

    /// Issue a token valid for `ttl`.
    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        name: &str,
        ttl: chrono::Duration,
    ) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            name: name.to_string(),
            exp: (chrono::Utc::now() + ttl).timestamp().max(0) as usize,
        };

        let token = encode(&Header::default(), &claims, &self.keys.encoding)?;
        Ok(token)
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// `Ok(None)` when there is no header at all, an error when there is one we
/// cannot use.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AdmissionError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AdmissionError::MalformedHeader)?;

    Ok(Some(token))
}
