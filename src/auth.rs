//! Token verification for the `authenticate` control event.

use std::collections::HashSet;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::VerificationError;
use crate::store::IdentityKey;

/// Identity extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub key: IdentityKey,
    pub role: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerificationError>;
}

/// Claims issued by the auth routes. Older tokens carry `id` or `_id` instead of `userId`.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    id: Option<String>,
    #[serde(rename = "_id")]
    object_id: Option<String>,
    role: Option<String>,
}

/// HS256 verifier sharing its secret with the token issuer.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is still checked when the token carries one.
        validation.required_spec_claims = HashSet::new();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerificationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(VerificationError::MissingToken);
        }
        let claims = decode::<Claims>(token, &self.key, &self.validation)?.claims;
        let key = [claims.user_id, claims.id, claims.object_id]
            .into_iter()
            .flatten()
            .find_map(|raw| IdentityKey::parse(&raw))
            .ok_or(VerificationError::MissingIdentity)?;
        Ok(VerifiedIdentity {
            key,
            role: claims.role,
        })
    }
}
