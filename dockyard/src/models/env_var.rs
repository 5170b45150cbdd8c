//! Environment variable models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{PlatformError, PlatformResult};
use crate::models::ids::{EnvVarId, ProjectId};

/// Placeholder returned instead of any stored value
pub const MASKED_VALUE: &str = "********";

/// A project environment variable. The value only ever exists here as ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub id: EnvVarId,
    pub project_id: ProjectId,
    pub key: String,
    pub ciphertext: String,
    pub created_at: DateTime<Utc>,
}

impl EnvVar {
    pub fn new(project_id: ProjectId, key: &str, ciphertext: String) -> PlatformResult<Self> {
        validate_key(key)?;
        Ok(Self {
            id: EnvVarId::generate(),
            project_id,
            key: key.to_string(),
            ciphertext,
            created_at: Utc::now(),
        })
    }
}

/// An environment variable as shown to users: the value is always masked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedEnvVar {
    pub id: EnvVarId,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

impl From<&EnvVar> for MaskedEnvVar {
    fn from(var: &EnvVar) -> Self {
        Self {
            id: var.id.clone(),
            key: var.key.clone(),
            value: MASKED_VALUE.to_string(),
            created_at: var.created_at,
        }
    }
}

/// Keys must be valid shell identifiers
pub fn validate_key(key: &str) -> PlatformResult<()> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if !valid {
        return Err(PlatformError::ValidationError(format!(
            "invalid environment variable key: {:?}",
            key
        )));
    }
    Ok(())
}
