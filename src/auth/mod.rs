//! Bearer-credential storage and identity lookup.
//!
//! The credential is an opaque token issued elsewhere; issuing and verifying
//! tokens is explicitly not this client's job. The token lives in a JSON
//! file under the config dir and is attached to gateway calls as a bearer
//! header.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no stored credential; run `gameforge login` first")]
    NoCredential,

    #[error("credential storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("credential file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("identity lookup failed: {0}")]
    Lookup(String),

    #[error("the stored credential was rejected; log in again")]
    Rejected,
}

/// The decoded principal behind the stored credential.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthFile {
    token: Option<String>,
}

/// File-backed credential storage.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Storage under the platform config dir.
    pub fn new() -> Result<Self, AuthError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| {
                AuthError::Storage(std::io::Error::other("could not find config directory"))
            })?
            .join("gameforge");
        fs::create_dir_all(&config_dir)?;
        Ok(Self {
            path: config_dir.join("auth.json"),
        })
    }

    /// Storage at an explicit path (used by tests).
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// The stored token, if any.
    pub fn load(&self) -> Result<Option<String>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let file: AuthFile = serde_json::from_str(&content)?;
        Ok(file.token)
    }

    /// The stored token, or an error telling the user to log in.
    pub fn require(&self) -> Result<String, AuthError> {
        self.load()?.ok_or(AuthError::NoCredential)
    }

    /// Store a token, replacing any previous one. The file is created
    /// owner-readable only.
    pub fn save(&self, token: &str) -> Result<(), AuthError> {
        let content = serde_json::to_string_pretty(&AuthFile {
            token: Some(token.trim().to_string()),
        })?;
        fs::write(&self.path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Forget the stored token.
    pub fn clear(&self) -> Result<(), AuthError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct MeResponse {
    user: Identity,
}

/// Resolve the principal behind `token` via the product's `/api/auth/me`.
pub async fn whoami(
    base_url: &str,
    token: &str,
    timeout: Duration,
) -> Result<Identity, AuthError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let response = client
        .get(format!("{base_url}/api/auth/me"))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| AuthError::Lookup(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AuthError::Rejected);
    }
    let text = response
        .text()
        .await
        .map_err(|e| AuthError::Lookup(e.to_string()))?;
    if !status.is_success() {
        return Err(AuthError::Lookup(format!("HTTP {status}: {text}")));
    }

    let me: MeResponse =
        serde_json::from_str(&text).map_err(|e| AuthError::Lookup(e.to_string()))?;
    Ok(me.user)
}
