use std::net::SocketAddr;

use anyhow::{anyhow, Error};

/// Opaque thread-safe error.
/// Only use this when the error is unrecoverable and intended to reach a sink,
/// like the tracing logs in a server.
pub type AnyError = Error;

#[derive(Debug)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

/// An error with a location attached.
#[derive(Debug)]
pub struct LocatedError {
    pub error: AnyError,
    pub location: &'static Location,
}

impl std::error::Error for LocatedError {}

impl std::fmt::Display for LocatedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            error,
            location: Location { file, line, column },
        } = self;
        write!(f, "{error} at {file}@{line}:{column}")
    }
}

pub type OpaqueResult<T> = Result<T, LocatedError>;

pub trait ResultLocation<T> {
    fn located(self, location: &'static Location) -> OpaqueResult<T>;
}

impl<T, E: Into<Box<dyn std::error::Error + Send + Sync>>> ResultLocation<T> for Result<T, E> {
    #[inline]
    fn located(self, location: &'static Location) -> OpaqueResult<T> {
        self.map_err(|error| error.located(location))
    }
}

pub trait ErrorLocation {
    fn located(self, location: &'static Location) -> LocatedError;
}

impl<E: Into<Box<dyn std::error::Error + Send + Sync>>> ErrorLocation for E {
    #[inline]
    fn located(self, location: &'static Location) -> LocatedError {
        let boxed: Box<dyn std::error::Error + Send + Sync> = self.into();
        let error: anyhow::Error = anyhow!(boxed);
        LocatedError { error, location }
    }
}

/// An error on a connection, with the remote peer attached when it is known.
#[derive(Debug)]
pub struct ConnectionError {
    pub error: LocatedError,
    pub peer: Option<SocketAddr>,
}

pub trait ErrorPeer<T> {
    fn peer(self, peer: Option<SocketAddr>) -> Result<T, ConnectionError>;
}

impl<T> ErrorPeer<T> for OpaqueResult<T> {
    #[inline]
    fn peer(self, peer: Option<SocketAddr>) -> Result<T, ConnectionError> {
        self.map_err(|error| ConnectionError { error, peer })
    }
}

pub use crate::here;

#[macro_export]
macro_rules! here {
    () => {
        &$crate::error::Location {
            file: file!(),
            line: line!(),
            column: column!(),
        }
    };
}

pub use crate::log_connection_error;

#[macro_export]
macro_rules! log_connection_error {
    ($err:expr, $($field:tt)*) => {{
        let $crate::error::ConnectionError {
            error:
                $crate::error::LocatedError {
                    error,
                    location: $crate::error::Location { file, line, column },
                },
            peer,
        } = $err;
        match peer {
            Some(peer) => {
                tracing::error!(%peer, file, line, column, $($field)*, error);
            }
            None => {
                tracing::error!(peer = "<unknown>", file, line, column, $($field)*, error);
            }
        }
    }};
}
