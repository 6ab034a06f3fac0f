use thiserror::Error;

/// Closed set of failure categories surfaced across the gateway, used to map
/// any error to an HTTP status and a stable wire code without each call site
/// hand-rolling the mapping.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("validation")]
    Validation,
    #[error("conflict")]
    Conflict,
    #[error("not found")]
    NotFound,
    #[error("launch failed")]
    LaunchFailed,
    #[error("child error")]
    ChildError,
    #[error("timeout")]
    Timeout,
    #[error("backend auth")]
    BackendAuth,
    #[error("persistence degraded")]
    PersistenceDegraded,
    #[error("internal")]
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{message}")]
    Kind {
        kind: ErrorKind,
        message: String,
    },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error")]
    Other {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn other(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other {
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Kind {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::kind(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::kind(ErrorKind::Conflict, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::kind(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self::kind(ErrorKind::LaunchFailed, message)
    }

    #[must_use]
    pub fn child_error(message: impl Into<String>) -> Self {
        Self::kind(ErrorKind::ChildError, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::kind(ErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn backend_auth(message: impl Into<String>) -> Self {
        Self::kind(ErrorKind::BackendAuth, message)
    }

    #[must_use]
    pub fn persistence_degraded(message: impl Into<String>) -> Self {
        Self::kind(ErrorKind::PersistenceDegraded, message)
    }

    /// Classifies this error for HTTP status / wire-code mapping. Errors
    /// constructed without an explicit kind classify as `Internal`.
    #[must_use]
    pub fn classify(&self) -> ErrorKind {
        match self {
            Self::Kind { kind, .. } => *kind,
            Self::Message(_) | Self::Io(_) | Self::Other { .. } => ErrorKind::Internal,
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Shared context trait ────────────────────────────────────────────────────

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// fluidmcp_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_defaults_to_internal() {
        assert_eq!(Error::message("oops").classify(), ErrorKind::Internal);
    }

    #[test]
    fn classify_kind_roundtrips() {
        assert_eq!(Error::not_found("missing").classify(), ErrorKind::NotFound);
        assert_eq!(Error::timeout("slow").classify(), ErrorKind::Timeout);
    }
}
