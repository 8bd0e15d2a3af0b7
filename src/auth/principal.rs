//! Principal extraction from the platform identity header
//!
//! The hosting platform authenticates the user and forwards the result as a
//! base64-encoded JSON document in `x-ms-client-principal`. Anything reachable
//! from that header is untrusted input: every decode failure is reported as
//! [`MalformedPrincipal`] and treated by callers as "not authenticated".

use axum::http::HeaderMap;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

/// Header carrying the encoded client principal
pub const CLIENT_PRINCIPAL_HEADER: &str = "x-ms-client-principal";

/// Standard alphabet, padding optional
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Why a principal could not be extracted
#[derive(Debug, thiserror::Error)]
pub enum MalformedPrincipal {
    /// Header value is not valid base64
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Payload is not a JSON principal document
    #[error("invalid principal document: {0}")]
    Json(#[from] serde_json::Error),

    /// Document carries no user identifier
    #[error("principal has no userId")]
    MissingUserId,
}

/// A typed assertion about the principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Claim type (short name or URI)
    pub typ: String,
    /// Claim value
    pub val: String,
}

impl Claim {
    /// Create a claim
    pub fn new(typ: impl Into<String>, val: impl Into<String>) -> Self {
        Self {
            typ: typ.into(),
            val: val.into(),
        }
    }
}

/// Authenticated identity making a request
///
/// Built once per request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    identity_provider: String,
    user_id: String,
    display_name: String,
    roles: Vec<String>,
    claims: Vec<Claim>,
}

impl Principal {
    /// Create a principal with no roles or claims
    pub fn new(
        identity_provider: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            identity_provider: identity_provider.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            roles: Vec::new(),
            claims: Vec::new(),
        }
    }

    /// Append a claim
    pub fn with_claim(mut self, typ: impl Into<String>, val: impl Into<String>) -> Self {
        self.claims.push(Claim::new(typ, val));
        self
    }

    /// Append a platform role (stored lower-cased)
    pub fn with_role(mut self, role: impl AsRef<str>) -> Self {
        self.roles.push(role.as_ref().to_lowercase());
        self
    }

    /// Parse an already base64-decoded principal document
    pub fn from_json(bytes: &[u8]) -> Result<Self, MalformedPrincipal> {
        let raw: RawPrincipal = serde_json::from_slice(bytes)?;
        let principal = Principal::from(raw);
        if principal.user_id.is_empty() {
            return Err(MalformedPrincipal::MissingUserId);
        }
        Ok(principal)
    }

    /// Decode the raw header value (base64 JSON)
    pub fn from_header_value(value: &str) -> Result<Self, MalformedPrincipal> {
        let bytes = LENIENT_BASE64.decode(value.trim())?;
        Self::from_json(&bytes)
    }

    /// Identity provider that authenticated the user (e.g. "aad")
    pub fn identity_provider(&self) -> &str {
        &self.identity_provider
    }

    /// User identifier as issued: an object id, or a UPN/email on some providers
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Human-readable name (`userDetails`)
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Lower-cased platform roles
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Claims in the order they were issued
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }
}

/// Wire shape of the principal document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrincipal {
    #[serde(default)]
    identity_provider: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_details: Option<String>,
    #[serde(default)]
    user_roles: Option<Vec<String>>,
    #[serde(default)]
    claims: Option<Vec<RawClaim>>,
}

#[derive(Debug, Deserialize)]
struct RawClaim {
    #[serde(default)]
    typ: Option<String>,
    #[serde(default)]
    val: Option<serde_json::Value>,
}

impl From<RawPrincipal> for Principal {
    fn from(raw: RawPrincipal) -> Self {
        let claims = raw
            .claims
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| {
                let typ = c.typ?;
                let val = match c.val? {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                Some(Claim { typ, val })
            })
            .collect();

        Self {
            identity_provider: raw.identity_provider.unwrap_or_default(),
            user_id: raw.user_id.unwrap_or_default().trim().to_string(),
            display_name: raw.user_details.unwrap_or_default(),
            roles: raw
                .user_roles
                .unwrap_or_default()
                .iter()
                .map(|r| r.to_lowercase())
                .collect(),
            claims,
        }
    }
}

/// Extract the principal from request headers
///
/// Returns `None` when the header is absent or cannot be decoded.
pub fn extract_principal(headers: &HeaderMap) -> Option<Principal> {
    let value = headers.get(CLIENT_PRINCIPAL_HEADER)?.to_str().ok()?;

    match Principal::from_header_value(value) {
        Ok(principal) => Some(principal),
        Err(e) => {
            debug!(error = %e, "Discarding malformed client principal");
            None
        }
    }
}
