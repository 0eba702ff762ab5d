//! Inbound request validation.
//!
//! A delivery must carry exactly one credential: a shared token (header or
//! `token` field in the body) or a GitHub `X-Hub-Signature-256` HMAC of the
//! raw body. Whitelisted endpoints and development mode skip the check.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::config::TrainConfig;
use crate::manager::status;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookRejection {
    #[error("request carries neither a token nor a signature")]
    MissingCredentials,

    #[error("request carries both a token and a signature")]
    AmbiguousCredentials,

    #[error("unknown token")]
    InvalidToken,

    #[error("signature does not match payload")]
    InvalidSignature,

    #[error("signature received but no webhook secret is configured")]
    NoSecret,

    #[error("payload is not a JSON object")]
    InvalidPayload,
}

impl HookRejection {
    /// Response code for a rejected request.
    pub fn code(&self) -> u16 {
        status::BAD_REQUEST
    }
}

/// What the transport saw of one request.
#[derive(Debug, Clone, Copy)]
pub struct HookRequest<'a> {
    pub url: &'a str,
    pub token: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

pub struct SecureHook {
    tokens: Vec<String>,
    secret: Option<Vec<u8>>,
    whitelisted: Vec<String>,
    enforce: bool,
}

impl SecureHook {
    pub fn from_config(config: &TrainConfig) -> Self {
        Self {
            tokens: config.security.tokens.clone(),
            secret: config
                .github
                .webhook_secret
                .as_ref()
                .map(|s| s.as_bytes().to_vec()),
            whitelisted: config.security.whitelisted.clone(),
            enforce: !config.env.is_development(),
        }
    }

    /// Validate `request` and return the payload to dispatch.
    pub fn validate(&self, request: &HookRequest<'_>) -> Result<Value, HookRejection> {
        let payload = parse_payload(request.body)?;
        if !self.enforce || self.whitelisted.iter().any(|w| w == request.url) {
            return Ok(payload);
        }

        let body_token = payload.get("token").and_then(Value::as_str);
        let token = request.token.or(body_token);
        match (token, request.signature) {
            (None, None) => Err(HookRejection::MissingCredentials),
            (Some(_), Some(_)) => Err(HookRejection::AmbiguousCredentials),
            (Some(token), None) => {
                if self
                    .tokens
                    .iter()
                    .any(|known| constant_time_eq(known.as_bytes(), token.as_bytes()))
                {
                    Ok(payload)
                } else {
                    Err(HookRejection::InvalidToken)
                }
            }
            (None, Some(signature)) => {
                let secret = self.secret.as_deref().ok_or(HookRejection::NoSecret)?;
                verify_signature(secret, request.body, signature)?;
                Ok(payload)
            }
        }
    }
}

/// Interactive chat callbacks wrap the JSON object in a `payload` string field.
fn parse_payload(body: &[u8]) -> Result<Value, HookRejection> {
    let value: Value = serde_json::from_slice(body).map_err(|_| HookRejection::InvalidPayload)?;
    let value = match value.get("payload").and_then(Value::as_str) {
        Some(inner) => serde_json::from_str(inner).map_err(|_| HookRejection::InvalidPayload)?,
        None => value,
    };
    if value.is_object() {
        Ok(value)
    } else {
        Err(HookRejection::InvalidPayload)
    }
}

fn mac(secret: &[u8], body: &[u8]) -> Result<HmacSha256, HookRejection> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| HookRejection::NoSecret)?;
    mac.update(body);
    Ok(mac)
}

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, HookRejection> {
    let digest = mac(secret, body)?.finalize().into_bytes();
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
}

pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> Result<(), HookRejection> {
    let digest = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|h| hex::decode(h).ok())
        .ok_or(HookRejection::InvalidSignature)?;
    mac(secret, body)?
        .verify_slice(&digest)
        .map_err(|_| HookRejection::InvalidSignature)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
