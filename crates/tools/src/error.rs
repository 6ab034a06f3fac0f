use fluidmcp_common::FromMessage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),

    #[error("tool '{0}' is not registered")]
    NotRegistered(String),

    #[error("invalid tool schema for '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fluidmcp_common::impl_context!();
