//! Error types for talking to the tutor service

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias using [`ChatError`]
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur while asking the tutor or syncing state with it
#[derive(Error, Debug)]
pub enum ChatError {
    /// No token or username is stored locally
    #[error("User not authenticated. Run `tutor-chat login` first")]
    AuthMissing,

    /// The prompt was empty or whitespace
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    RequestFailed { status: StatusCode, body: String },

    /// The request could not be sent or the connection failed before a response
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The body stream broke after some text was already delivered
    #[error("Stream interrupted: {message}")]
    StreamRead { message: String, partial: String },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The local session file could not be read or written
    #[error("Session error: {0}")]
    Session(String),

    /// The configured base URL cannot be joined with an endpoint path
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ChatError {
    /// Text received before the failure, if any
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            ChatError::StreamRead { partial, .. } if !partial.is_empty() => Some(partial),
            _ => None,
        }
    }
}
