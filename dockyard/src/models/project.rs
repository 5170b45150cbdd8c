//! Project models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::authn::principal::Principal;
use crate::errors::{PlatformError, PlatformResult};
use crate::models::env_var::EnvVar;
use crate::models::ids::ProjectId;
use crate::utils::generate_subdomain;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_PORT: u16 = 3000;

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ssh", "git", "file"];

/// A user-owned definition of what to build and where to route it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,

    /// Display name
    pub name: String,

    /// Source repository URL
    pub repository_url: String,

    /// Branch to build
    pub branch: String,

    /// Port the application listens on inside the container
    pub port: u16,

    /// Generated routing host label; also the container name
    pub subdomain: String,

    /// Owning user ID
    pub owner_id: String,

    /// Environment variables, in creation order
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when registering a project
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub repository_url: String,
    pub branch: Option<String>,
    pub port: Option<u16>,
}

/// Owner-editable fields; `None` leaves the current value
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub repository_url: Option<String>,
    pub branch: Option<String>,
    pub port: Option<u16>,
}

impl Project {
    /// Validate the request and build a project owned by `owner_id`
    pub fn new(owner_id: impl Into<String>, request: NewProject) -> PlatformResult<Self> {
        let name = validate_name(&request.name)?;
        validate_repository_url(&request.repository_url)?;
        let branch = match request.branch {
            Some(branch) => validate_branch(&branch)?,
            None => DEFAULT_BRANCH.to_string(),
        };
        let port = validate_port(request.port.unwrap_or(DEFAULT_PORT))?;
        let now = Utc::now();

        Ok(Self {
            id: ProjectId::generate(),
            subdomain: generate_subdomain(&name),
            name,
            repository_url: request.repository_url.trim().to_string(),
            branch,
            port,
            owner_id: owner_id.into(),
            env_vars: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply an owner update. The subdomain never changes.
    pub fn apply(&mut self, update: ProjectUpdate) -> PlatformResult<()> {
        if let Some(name) = update.name {
            self.name = validate_name(&name)?;
        }
        if let Some(url) = update.repository_url {
            validate_repository_url(&url)?;
            self.repository_url = url.trim().to_string();
        }
        if let Some(branch) = update.branch {
            self.branch = validate_branch(&branch)?;
        }
        if let Some(port) = update.port {
            self.port = validate_port(port)?;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Container name for this project
    pub fn container_name(&self) -> &str {
        &self.subdomain
    }

    /// Host the reverse proxy routes to this project's container
    pub fn host(&self, domain: &str) -> String {
        format!("{}.{}", self.subdomain, domain)
    }

    pub fn public_url(&self, domain: &str) -> String {
        format!("https://{}", self.host(domain))
    }

    /// Owners and admins may act on a project
    pub fn is_accessible_by(&self, principal: &Principal) -> bool {
        principal.is_admin() || principal.user_id == self.owner_id
    }

    /// Check the fields a deploy needs are present
    pub fn ensure_deployable(&self) -> PlatformResult<()> {
        if self.repository_url.trim().is_empty() {
            return Err(PlatformError::ValidationError(format!(
                "project {} has no repository URL",
                self.id
            )));
        }
        if self.port == 0 {
            return Err(PlatformError::ValidationError(format!(
                "project {} has no port configured",
                self.id
            )));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> PlatformResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PlatformError::ValidationError(
            "project name must not be empty".to_string(),
        ));
    }
    if name.len() > 64 {
        return Err(PlatformError::ValidationError(
            "project name must be at most 64 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn validate_branch(branch: &str) -> PlatformResult<String> {
    let branch = branch.trim();
    if branch.is_empty() || branch.starts_with('-') || branch.contains(char::is_whitespace) {
        return Err(PlatformError::ValidationError(format!(
            "invalid branch name: {:?}",
            branch
        )));
    }
    Ok(branch.to_string())
}

fn validate_port(port: u16) -> PlatformResult<u16> {
    if port == 0 {
        return Err(PlatformError::ValidationError(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(port)
}

/// Accept only URLs git can clone without a shell in between
pub fn validate_repository_url(raw: &str) -> PlatformResult<()> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        PlatformError::ValidationError(format!("invalid repository URL {:?}: {}", raw, e))
    })?;

    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(PlatformError::ValidationError(format!(
            "unsupported repository URL scheme: {}",
            url.scheme()
        )));
    }
    Ok(())
}
