//! JWT validation for publishers and subscribers.
//!
//! Tokens are plain JWS. HMAC algorithms take a shared secret; RSA, ECDSA and
//! EdDSA take a PEM public key. Publishers and subscribers may use distinct
//! keys, and a token carrying a `kid` header is checked against the matching
//! entry of the key set when one is configured.
//!
//! `exp` and `nbf` are enforced when present but not required.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use axum::http::StatusCode;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use thiserror::Error;

use super::claims::{AuthorizationClaims, Role, Scope};
use crate::config::JwtSettings;
use crate::utils::error::HubError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing JWT")]
    MissingToken,

    #[error("malformed JWT: {0}")]
    MalformedToken(String),

    #[error("invalid JWT signature")]
    InvalidSignature,

    #[error("JWT expired")]
    Expired,

    #[error("JWT not valid yet")]
    NotYetValid,

    #[error("unknown JWT key id `{0}`")]
    UnknownKey(String),

    #[error("JWT scope does not cover the requested topics")]
    InsufficientScope,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InsufficientScope => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::InvalidSignature,
            _ => Self::MalformedToken(err.to_string()),
        }
    }
}

/// A key able to verify tokens signed with one algorithm.
#[derive(Clone)]
pub struct VerificationKey {
    algorithm: Algorithm,
    key: DecodingKey,
}

impl VerificationKey {
    /// Build a key from an algorithm name (`HS256`, `RS512`, `ES256`, ...)
    /// and its material: the secret for HMAC, a PEM public key otherwise.
    pub fn from_config(algorithm: &str, material: &str) -> Result<Self, HubError> {
        let algorithm = parse_algorithm(algorithm)?;
        let bytes = material.as_bytes();
        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                DecodingKey::from_secret(bytes)
            }
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(bytes).map_err(key_error)?,
            Algorithm::ES256 | Algorithm::ES384 => {
                DecodingKey::from_ec_pem(bytes).map_err(key_error)?
            }
            Algorithm::EdDSA => DecodingKey::from_ed_pem(bytes).map_err(key_error)?,
            #[allow(unreachable_patterns)]
            other => return Err(unsupported(other)),
        };
        Ok(Self { algorithm, key })
    }

    pub fn hmac(secret: &str) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// A key able to mint tokens; used by the `token` CLI command and tests.
#[derive(Clone)]
pub struct SigningKey {
    algorithm: Algorithm,
    key: EncodingKey,
}

impl SigningKey {
    pub fn from_config(algorithm: &str, material: &str) -> Result<Self, HubError> {
        let algorithm = parse_algorithm(algorithm)?;
        let bytes = material.as_bytes();
        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                EncodingKey::from_secret(bytes)
            }
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => EncodingKey::from_rsa_pem(bytes).map_err(key_error)?,
            Algorithm::ES256 | Algorithm::ES384 => {
                EncodingKey::from_ec_pem(bytes).map_err(key_error)?
            }
            Algorithm::EdDSA => EncodingKey::from_ed_pem(bytes).map_err(key_error)?,
            #[allow(unreachable_patterns)]
            other => return Err(unsupported(other)),
        };
        Ok(Self { algorithm, key })
    }

    pub fn hmac(secret: &str) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign `claims`, stamping `kid` into the header when given.
    pub fn sign(&self, claims: &AuthorizationClaims, kid: Option<&str>) -> Result<String, AuthError> {
        let mut header = Header::new(self.algorithm);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &self.key).map_err(|e| AuthError::MalformedToken(e.to_string()))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct JwtAuthorizer {
    publisher: VerificationKey,
    subscriber: VerificationKey,
    key_set: HashMap<String, VerificationKey>,
    leeway_secs: u64,
    audience: Option<String>,
}

impl JwtAuthorizer {
    pub fn new(publisher: VerificationKey, subscriber: VerificationKey) -> Self {
        Self {
            publisher,
            subscriber,
            key_set: HashMap::new(),
            leeway_secs: 0,
            audience: None,
        }
    }

    pub fn from_settings(settings: &JwtSettings) -> Result<Self, HubError> {
        let publisher = VerificationKey::from_config(
            settings
                .publisher_algorithm
                .as_deref()
                .unwrap_or(&settings.algorithm),
            settings.publisher_key.as_deref().unwrap_or(&settings.key),
        )?;
        let subscriber = VerificationKey::from_config(
            settings
                .subscriber_algorithm
                .as_deref()
                .unwrap_or(&settings.algorithm),
            settings.subscriber_key.as_deref().unwrap_or(&settings.key),
        )?;

        let mut authorizer = Self::new(publisher, subscriber).with_leeway(settings.leeway_secs);
        if let Some(audience) = &settings.audience {
            authorizer = authorizer.with_audience(audience);
        }
        for entry in &settings.keys {
            let key = VerificationKey::from_config(&entry.algorithm, &entry.key)?;
            authorizer = authorizer.with_key(&entry.kid, key);
        }
        Ok(authorizer)
    }

    pub fn with_key(mut self, kid: &str, key: VerificationKey) -> Self {
        self.key_set.insert(kid.to_string(), key);
        self
    }

    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.audience = Some(audience.to_string());
        self
    }

    /// Verify `token` and return its claims. Scope is not checked here.
    pub fn decode(&self, token: &str, role: Role) -> Result<AuthorizationClaims, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::MalformedToken(e.to_string()))?;

        let key = match header.kid {
            Some(kid) if !self.key_set.is_empty() => self
                .key_set
                .get(&kid)
                .ok_or(AuthError::UnknownKey(kid))?,
            _ => match role {
                Role::Publish => &self.publisher,
                Role::Subscribe => &self.subscriber,
            },
        };

        let mut validation = Validation::new(key.algorithm);
        validation.leeway = self.leeway_secs;
        validation.validate_nbf = true;
        validation.required_spec_claims = HashSet::new();
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<AuthorizationClaims>(token, &key.key, &validation)?;
        Ok(data.claims)
    }

    /// Verify `token` and check its `role` scope covers every one of `topics`.
    pub fn authorize(
        &self,
        token: &str,
        role: Role,
        topics: &[String],
    ) -> Result<AuthorizationClaims, AuthError> {
        let claims = self.decode(token, role)?;
        if !authorize_topics(&claims.scope(role), topics) {
            return Err(AuthError::InsufficientScope);
        }
        Ok(claims)
    }
}

/// True iff every topic matches a selector of `scope`, or `scope` has `*`.
pub fn authorize_topics(scope: &Scope, topics: &[String]) -> bool {
    scope.covers_all(topics)
}

fn parse_algorithm(name: &str) -> Result<Algorithm, HubError> {
    Algorithm::from_str(name.trim())
        .map_err(|_| HubError::config(format!("unsupported JWT algorithm `{name}`")))
}

fn unsupported(algorithm: Algorithm) -> HubError {
    HubError::config(format!("unsupported JWT algorithm `{algorithm:?}`"))
}

fn key_error(err: jsonwebtoken::errors::Error) -> HubError {
    HubError::config(format!("invalid JWT key: {err}"))
}
