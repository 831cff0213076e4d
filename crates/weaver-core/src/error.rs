//! Error types for Weaver

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("model call failed: {provider} - {message}")]
    ModelCall { provider: String, message: String },

    #[error("malformed tool invocation: {0}")]
    MalformedToolInvocation(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::PersistenceFailure(reason.into())
    }

    pub fn model_call(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelCall {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
