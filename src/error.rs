use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Session error: {0}")]
    Sequence(#[from] crate::session::SequenceError),

    #[error("Generation call failed: {0}")]
    Call(#[from] crate::transport::CallError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("Games error: {0}")]
    Gallery(#[from] crate::gallery::GalleryError),

    #[error("Auth error: {0}")]
    Auth(#[from] crate::auth::AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
