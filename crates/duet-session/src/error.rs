use thiserror::Error;

use duet_backend::BackendError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Account {0} has no user profile")]
    MissingProfile(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("Invalid connection code: {0}")]
    InvalidCode(String),

    #[error("No relationship uses that connection code")]
    NoMatch,

    #[error("The {0} slot of that relationship is already taken")]
    SlotTaken(&'static str),

    #[error("Already in a relationship")]
    AlreadyPaired,

    #[error("Not in a relationship")]
    NoRelationship,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
