use thiserror::Error;

use duet_types::api::ErrorBody;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// Map a non-2xx response. The backend's JSON error body is preferred,
    /// the raw text is used when it does not parse.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.trim().to_string());

        match status {
            401 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            _ => Self::Api { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// A listing named a `cursorAfter` document that does not exist.
    pub fn is_unknown_cursor(&self) -> bool {
        matches!(self, Self::Api { status: 400, message } if message.contains("'cursor'"))
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
