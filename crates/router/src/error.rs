use fluidmcp_common::FromMessage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("backend completion failed: {0}")]
    Backend(String),

    #[error("{0}")]
    Message(String),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fluidmcp_common::impl_context!();
