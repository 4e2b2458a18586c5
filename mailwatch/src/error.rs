use std::{any::Any, error, io, result};

use thiserror::Error;
use tokio::task::JoinError;

/// The global `Result` alias of the library.
pub type Result<T> = result::Result<T, Error>;

/// The global any `Result` alias of the library.
///
/// The difference with [`Result`] is that it takes a dynamic error
/// `Box<dyn AnyError>`. It is mostly used by arrival handlers, whose
/// errors are not known at compilation time.
pub type AnyResult<T> = result::Result<T, AnyBoxedError>;

/// The global, dowcastable any `Error` trait of the library.
///
/// This trait is used instead of [`Error`] when an error that is not
/// known at compilation time cannot be placed in a generic due to
/// object-safe trait constraint.
pub trait AnyError: error::Error + Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl AnyError for io::Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The global any boxed `Error` alias of the module.
pub type AnyBoxedError = Box<dyn AnyError + Send + 'static>;

impl error::Error for AnyBoxedError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.as_ref().source()
    }
}

impl From<io::Error> for AnyBoxedError {
    fn from(err: io::Error) -> Self {
        Box::new(err)
    }
}

/// The global `Error` enum of the library.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to mailbox server {1}:{2}")]
    ConnectError(#[source] io::Error, String, u16),
    #[error("connection to mailbox server lost")]
    ConnectionLostError(#[source] io::Error),
    #[error("mailbox server dropped the session: {0}")]
    ProtocolError(String),
    #[error("cannot authenticate to mailbox server as {0}")]
    AuthenticationFailedError(String),
    #[error("cannot open folder {1}: {0}")]
    OpenFolderError(String, String),

    #[error("cannot wait for folder changes")]
    IdleError(#[source] io::Error),
    #[error("cannot execute no-operation")]
    NoOpError(#[source] io::Error),

    #[error("cannot fetch messages {1}:{2}")]
    FetchFailedTransientError(#[source] io::Error, u32, u32),
    #[error("cannot fetch messages {1}:{2}: {0}")]
    FetchFailedError(String, u32, u32),

    #[error("giving up after {0} failed attempts")]
    RetryExhaustedError(u8),
    #[error("cannot handle arrived messages")]
    HandlerError(#[source] AnyBoxedError),

    #[error("watch cancelled")]
    CancelledError,
    #[error("cannot join watcher task")]
    JoinTaskError(#[source] JoinError),
}

impl Error {
    /// Return `true` if the error is likely caused by a dropped
    /// session, in which case a reconnection may fix it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectError(..)
                | Self::ConnectionLostError(_)
                | Self::ProtocolError(_)
                | Self::IdleError(_)
                | Self::NoOpError(_)
                | Self::FetchFailedTransientError(..)
        )
    }

    /// Return `true` if the error comes from a cooperative shutdown.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::CancelledError)
    }
}

impl AnyError for Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for AnyBoxedError {
    fn from(err: Error) -> Self {
        Box::new(err)
    }
}
