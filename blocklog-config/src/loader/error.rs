use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to load blocklog configuration: {0}")]
    Source(String),

    #[error("invalid value for {name}: {message}")]
    InvalidEnv { name: &'static str, message: String },

    #[error("invalid blocklog configuration: {0}")]
    Invalid(String),

    #[error("failed to read .env file: {0}")]
    DotEnv(#[from] dotenvy::Error),
}
