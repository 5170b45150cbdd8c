//! Bearer token principal resolution

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

/// Caller role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// An identified caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Turns a bearer token into a principal
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Principal, PlatformError>;
}

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Role, defaults to a regular user
    #[serde(default)]
    pub role: Role,

    /// Expiration timestamp
    pub exp: i64,

    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,
}

/// HS256 JWT resolver sharing a secret with the identity service
pub struct JwtPrincipalResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtPrincipalResolver {
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl PrincipalResolver for JwtPrincipalResolver {
    async fn resolve(&self, token: &str) -> Result<Principal, PlatformError> {
        let data = decode::<AccessTokenClaims>(token, &self.key, &self.validation)
            .map_err(|e| PlatformError::Unauthorized(format!("invalid token: {}", e)))?;

        if data.claims.sub.is_empty() {
            return Err(PlatformError::Unauthorized("token has no subject".to_string()));
        }

        Ok(Principal::new(data.claims.sub, data.claims.role))
    }
}
