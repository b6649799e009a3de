use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to resolve required path: {0}")]
    Path(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Keychain(#[from] keyring::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("place lookup failed: {0}")]
    Provider(String),
}

impl AppError {
    // Provider and transport failures are scoped to a single candidate;
    // everything else aborts the operation that hit it.
    pub fn is_provider_scoped(&self) -> bool {
        matches!(self, AppError::Provider(_) | AppError::Http(_))
    }
}
