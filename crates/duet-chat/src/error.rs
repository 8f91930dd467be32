use std::path::PathBuf;

use thiserror::Error;

use duet_backend::BackendError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message {0} is not loaded")]
    UnknownMessage(String),

    #[error("Cannot read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("GIF search returned {status}: {message}")]
    Gif { status: u16, message: String },

    #[error("GIF search request failed: {0}")]
    GifTransport(#[from] reqwest::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, ChatError>;
