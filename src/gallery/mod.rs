//! Client for the saved-games gateway.
//!
//! Finished artifacts are saved, listed, retitled, published, and deleted
//! through the product's games API. The gateway owns persistence and
//! ownership enforcement; this module consumes it behind [`GameStore`] and
//! mirrors the server's validation rules locally so obviously invalid
//! requests never leave the process.

mod http;

pub use http::HttpGameStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server-side cap on saved markup.
pub const MAX_MARKUP_BYTES: usize = 1024 * 1024;

/// Server-side cap on titles.
pub const MAX_TITLE_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    fn public_listing() -> Self {
        Self::Public
    }
}

/// A saved game as the gateway returns it. Markup is omitted from some
/// listings, and timestamps are absent on freshly created records. The
/// public listing omits `status` entirely since it only ever returns
/// public games, so visibility defaults to [`Visibility::Public`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub title: String,
    #[serde(default, rename = "html")]
    pub source_markup: Option<String>,
    #[serde(rename = "status", default = "Visibility::public_listing")]
    pub visibility: Visibility,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GamePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "status")]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("invalid game: {0}")]
    Invalid(String),

    #[error("not logged in; run `gameforge login` first")]
    NoCredential,

    #[error("unauthorized: the stored credential was rejected")]
    Unauthorized,

    #[error("forbidden: you do not own this game")]
    Forbidden,

    #[error("game not found")]
    NotFound,

    #[error("gateway error (HTTP {status}): {message}")]
    Gateway { status: u16, message: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected gateway response: {0}")]
    Response(String),
}

/// The persistence gateway, consumed as an interface. All mutating calls
/// verify ownership server-side.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Persist a finished artifact under `title`.
    async fn save(
        &self,
        title: &str,
        markup: &str,
        visibility: Visibility,
    ) -> Result<Game, GalleryError>;

    /// The caller's own games, newest first.
    async fn list(&self) -> Result<Vec<Game>, GalleryError>;

    /// Everyone's public games, most recently updated first.
    async fn explore(&self) -> Result<Vec<Game>, GalleryError>;

    /// Retitle or change visibility of an owned game.
    async fn update(&self, id: &str, patch: &GamePatch) -> Result<Game, GalleryError>;

    /// Delete an owned game.
    async fn delete(&self, id: &str) -> Result<(), GalleryError>;
}

/// Mirror of the gateway's own validation, applied before any call.
pub(crate) fn validate_title(title: &str) -> Result<(), GalleryError> {
    if title.trim().is_empty() {
        return Err(GalleryError::Invalid("title is required".into()));
    }
    if title.trim().chars().count() > MAX_TITLE_CHARS {
        return Err(GalleryError::Invalid(format!(
            "title is too long (max {MAX_TITLE_CHARS} characters)"
        )));
    }
    Ok(())
}

pub(crate) fn validate_save(title: &str, markup: &str) -> Result<(), GalleryError> {
    validate_title(title)?;
    if markup.trim().is_empty() {
        return Err(GalleryError::Invalid("game markup is required".into()));
    }
    if markup.len() > MAX_MARKUP_BYTES {
        return Err(GalleryError::Invalid(format!(
            "game markup is too large (max {MAX_MARKUP_BYTES} bytes)"
        )));
    }
    Ok(())
}
