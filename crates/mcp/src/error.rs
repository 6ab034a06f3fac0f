use std::error::Error as StdError;

use fluidmcp_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("timeout waiting for '{method}' response after {secs}s")]
    Timeout { method: String, secs: u64 },
    #[error("request '{method}' (id={id}) was cancelled")]
    Cancelled { method: String, id: u64 },
    #[error("MCP error on '{method}': code={code} message={message}")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },
    #[error("MCP client for '{server}' is not ready (state: {state})")]
    NotReady { server: String, state: String },
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fluidmcp_common::impl_context!();
