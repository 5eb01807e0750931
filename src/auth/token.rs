//! Compact HS256 JSON Web Tokens.
//!
//! Tokens carry the username in `sub` and a `typ` claim that separates
//! short-lived access tokens from refresh tokens. Revocation is not handled
//! here: the service compares `iat_us` against the user's last password change.
//! `iat` stays in whole seconds for other JWT consumers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::core::security::JwtSecret;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub typ: TokenKind,
    pub iat: i64,
    /// Issue time in unix microseconds.
    pub iat_us: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Clone, Debug)]
pub struct TokenCodec {
    secret: JwtSecret,
}

impl TokenCodec {
    pub fn new(secret: JwtSecret) -> Self {
        Self { secret }
    }

    pub fn issue(&self, subject: &str, kind: TokenKind, ttl: Duration) -> Result<String, ApiError> {
        self.issue_at(subject, kind, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject: &str,
        kind: TokenKind,
        ttl: Duration,
        issued_at: DateTime<Utc>,
    ) -> Result<String, ApiError> {
        let iat = issued_at.timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            typ: kind,
            iat,
            iat_us: issued_at.timestamp_micros(),
            exp: iat + ttl.num_seconds(),
            jti: Uuid::new_v4().to_string(),
        };
        self.encode(&claims)
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, ApiError> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let header_json = serde_json::to_vec(&header).map_err(ApiError::internal)?;
        let claims_json = serde_json::to_vec(claims).map_err(ApiError::internal)?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = self.sign(signing_input.as_bytes())?;

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, ApiError> {
        self.decode_at(token, expected, Utc::now().timestamp())
    }

    /// Verifies signature, algorithm, type and expiry as of `now`.
    pub fn decode_at(&self, token: &str, expected: TokenKind, now: i64) -> Result<Claims, ApiError> {
        let mut parts = token.trim().split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ApiError::credentials());
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != ALGORITHM {
            tracing::debug!("Rejected token signed with {}", header.alg);
            return Err(ApiError::credentials());
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| ApiError::credentials())?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ApiError::credentials())?;

        let claims: Claims = decode_segment(claims_b64)?;
        if claims.typ != expected || claims.exp < now || claims.sub.trim().is_empty() {
            return Err(ApiError::credentials());
        }

        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, ApiError> {
        let mut mac = self.mac()?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn mac(&self) -> Result<HmacSha256, ApiError> {
        HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(ApiError::internal)
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, ApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| ApiError::credentials())?;
    serde_json::from_slice(&bytes).map_err(|_| ApiError::credentials())
}
