use actix_web::{http::header::HeaderValue, web, HttpRequest};
use hmac::{digest::InvalidLength, Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::ServiceError;
use crate::schemas::UserId;

type HmacSha256 = Hmac<Sha256>;

const MAX_USER_ID_LEN: usize = 64;

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Turns an opaque bearer credential into a user id.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &str) -> Result<UserId, ServiceError>;
}

/// Verifies tokens of the form `<user id>.<hex hmac-sha256(user id)>`, keyed
/// with the SHA-256 digest of the shared secret.
#[derive(Clone)]
pub struct HmacAuthenticator {
    mac: HmacSha256,
}

fn valid_user_id(user: &str) -> bool {
    !user.is_empty()
        && user.len() <= MAX_USER_ID_LEN
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '@'))
}

impl HmacAuthenticator {
    pub fn new(secret: &str) -> Result<Self, InvalidLength> {
        let mut sha256_hasher = Sha256::new();
        sha256_hasher.update(secret.as_bytes());
        let secret_hash = sha256_hasher.finalize();
        Ok(Self {
            mac: HmacSha256::new_from_slice(&secret_hash)?,
        })
    }

    /// Signs a token for `user`. Issuance normally lives in the identity
    /// service; this exists for development and tests.
    pub fn issue(&self, user: &str) -> Result<String, ServiceError> {
        if !valid_user_id(user) {
            return Err(ServiceError::invalid("user id has invalid characters"));
        }
        let mut mac = self.mac.clone();
        mac.update(user.as_bytes());
        Ok(format!("{user}.{}", hex::encode(mac.finalize().into_bytes())))
    }
}

impl Authenticator for HmacAuthenticator {
    fn authenticate(&self, credential: &str) -> Result<UserId, ServiceError> {
        let (user, signature) = credential
            .rsplit_once('.')
            .ok_or(ServiceError::Unauthenticated)?;
        if !valid_user_id(user) {
            return Err(ServiceError::Unauthenticated);
        }
        let signature = hex::decode(signature).map_err(|_| ServiceError::Unauthenticated)?;
        let mut mac = self.mac.clone();
        mac.update(user.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ServiceError::Unauthenticated)?;
        Ok(user.to_string())
    }
}

/// Bearer credential from the `Authorization` header, falling back to a
/// `token` query parameter for WebSocket upgrades from browsers.
pub fn bearer_token(request: &HttpRequest) -> Option<String> {
    let header = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)
        .and_then(Result::ok);
    if let Some(value) = header {
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
        return (!token.is_empty()).then(|| token.to_string());
    }
    web::Query::<TokenQuery>::from_query(request.query_string())
        .ok()
        .and_then(|query| query.into_inner().token)
        .filter(|token| !token.is_empty())
}

pub fn check_authorization(
    request: &HttpRequest,
    authenticator: &dyn Authenticator,
) -> Result<UserId, ServiceError> {
    let token = bearer_token(request).ok_or(ServiceError::Unauthenticated)?;
    authenticator.authenticate(&token)
}
