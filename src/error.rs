//! Error handling module.
use thiserror::Error;

/// Server error enum.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("NetworkError: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("ApiError: {0}")]
    ApiError(String),

    #[error("ConfigError: {0}")]
    ConfigError(String),

    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JsonError: {0}")]
    JsonError(#[from] serde_json::Error),

    #[cfg(feature = "cli")]
    #[error("OauthError: {0}")]
    OauthError(String),

    #[cfg(feature = "backend")]
    #[error("KeyStoreError: {0}")]
    KeyStoreError(String),

    #[cfg(feature = "backend")]
    #[error("DbError: {0}")]
    DbError(#[from] sqlx::Error),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    EdgarError(#[from] crate::edgar::EdgarError),
}
