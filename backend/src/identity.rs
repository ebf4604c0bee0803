//! Caller identity.
//!
//! Credentials live in the external identity service. It hands voters a
//! bearer token `<payload>.<signature>`:
//!
//! - `payload`: base64url (unpadded) JSON [`Claims`]
//! - `signature`: base64url (unpadded) HMAC-SHA256 of the payload string,
//!   keyed with the shared `token_secret`
//!
//! This module only verifies those tokens and exposes the result as request
//! guards.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rocket::http::Status;
use rocket::outcome::try_outcome;
use rocket::request::{FromRequest, Outcome, Request};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::VoteError;
use crate::models::{Role, VoterId};

type HmacSha256 = Hmac<Sha256>;

/// Voter ids are stored in 64-character columns.
const MAX_SUBJECT_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Voter id in the identity service.
    pub sub: VoterId,
    pub role: Role,
    pub email_verified: bool,
    /// Expiry, unix seconds.
    pub exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token secret rejected by HMAC")]
    InvalidSecret,
    #[error("token is not of the form <payload>.<signature>")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Clone)]
pub struct TokenVerifier {
    mac: HmacSha256,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        let mac = <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| TokenError::InvalidSecret)?;
        Ok(Self { mac })
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Mints a token. Used by tests and tooling that stand in for the
    /// identity service.
    pub fn issue(&self, claims: &Claims) -> String {
        // Claims hold only strings, bools and integers.
        let json = serde_json::to_vec(claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(&payload));
        format!("{payload}.{signature}")
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;
        if claims.sub.is_empty() || claims.sub.len() > MAX_SUBJECT_LEN {
            return Err(TokenError::Malformed);
        }
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub voter_id: VoterId,
    pub role: Role,
    pub email_verified: bool,
}

impl Caller {
    pub fn into_admin(self) -> Result<AdminCaller, VoteError> {
        match self.role {
            Role::Admin => Ok(AdminCaller(self)),
            Role::Voter => Err(VoteError::Forbidden),
        }
    }
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Self {
            voter_id: claims.sub,
            role: claims.role,
            email_verified: claims.email_verified,
        }
    }
}

/// An authenticated caller holding the admin role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCaller(Caller);

impl AdminCaller {
    pub fn voter_id(&self) -> &str {
        &self.0.voter_id
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Caller {
    type Error = VoteError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(verifier) = req.rocket().state::<TokenVerifier>() else {
            tracing::error!("token verifier is not managed");
            return Outcome::Error((Status::InternalServerError, VoteError::Unauthorized));
        };
        let Some(token) = req
            .headers()
            .get_one("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
        else {
            return Outcome::Error((Status::Unauthorized, VoteError::Unauthorized));
        };
        match verifier.verify(token.trim(), Utc::now()) {
            Ok(claims) => Outcome::Success(Caller::from(claims)),
            Err(err) => {
                tracing::debug!(error = %err, "rejected bearer token");
                Outcome::Error((Status::Unauthorized, VoteError::Unauthorized))
            }
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminCaller {
    type Error = VoteError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let caller = try_outcome!(req.guard::<Caller>().await);
        match caller.into_admin() {
            Ok(admin) => Outcome::Success(admin),
            Err(err) => Outcome::Error((Status::Forbidden, err)),
        }
    }
}

/// Network provenance of the request, captured for the ballot audit trail.
/// Absent values stay absent; the cast protocol rejects them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ConnectionInfo {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(ConnectionInfo {
            ip_address: req.client_ip().map(|ip| ip.to_string()),
            user_agent: req
                .headers()
                .get_one("User-Agent")
                .map(str::trim)
                .filter(|ua| !ua.is_empty())
                .map(str::to_owned),
        })
    }
}
