//! Error type for scheduling tests and dialing connections.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

//------------ Error ---------------------------------------------------------

/// Error type for the scheduler and the dialer.
///
/// The scheduler reports [`Error::DuplicateTest`] and
/// [`Error::WorkerSpawn`] synchronously to the submitter. Everything else is
/// delivered by a dialer through its `on_error` handler.
#[derive(Clone, Debug)]
pub enum Error {
    /// A test with the same identity is already ready or active.
    DuplicateTest,

    /// The background worker thread could not be started.
    WorkerSpawn(Arc<std::io::Error>),

    /// The address family hint was not recognized.
    InvalidAddressFamily(String),

    /// The candidate address and family lists are out of sync.
    AddressListDesync,

    /// Every candidate address failed to connect.
    NoRouteAvailable,

    /// The peer closed the connection.
    RemoteClosed,

    /// Reading from or writing to the connected socket failed.
    SocketError(Arc<std::io::Error>),

    /// The resolver could not be asked to start a query.
    ResolutionDispatchFailure(String),

    /// No data arrived within the configured read timeout.
    Timeout,

    /// The operation needs an established connection.
    NotConnected,

    /// Settings could not be loaded or dumped.
    Settings(Arc<serde_json::Error>),
}

impl Error {
    /// Returns whether the error ends a connection attempt before it was
    /// ever established.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidAddressFamily(_)
                | Error::AddressListDesync
                | Error::NoRouteAvailable
                | Error::ResolutionDispatchFailure(_)
        )
    }

    /// Returns a short machine readable name for use in report entries.
    pub fn failure_str(&self) -> &'static str {
        match self {
            Error::DuplicateTest => "duplicate_test",
            Error::WorkerSpawn(_) => "worker_spawn_error",
            Error::InvalidAddressFamily(_) => "invalid_address_family",
            Error::AddressListDesync => "address_list_desync",
            Error::NoRouteAvailable => "connect_error",
            Error::RemoteClosed => "eof_error",
            Error::SocketError(_) => "socket_error",
            Error::ResolutionDispatchFailure(_) => "dns_lookup_error",
            Error::Timeout => "generic_timeout_error",
            Error::NotConnected => "not_connected",
            Error::Settings(_) => "settings_error",
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::DuplicateTest => write!(f, "test already scheduled"),
            Error::WorkerSpawn(_) => {
                write!(f, "cannot start background worker")
            }
            Error::InvalidAddressFamily(family) => {
                write!(f, "invalid address family '{}'", family)
            }
            Error::AddressListDesync => {
                write!(f, "address and family lists out of sync")
            }
            Error::NoRouteAvailable => {
                write!(f, "no candidate address could be connected")
            }
            Error::RemoteClosed => write!(f, "connection closed by peer"),
            Error::SocketError(_) => write!(f, "socket error"),
            Error::ResolutionDispatchFailure(name) => {
                write!(f, "cannot start resolving '{}'", name)
            }
            Error::Timeout => write!(f, "timeout waiting for data"),
            Error::NotConnected => write!(f, "not connected"),
            Error::Settings(_) => write!(f, "invalid settings"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::DuplicateTest => None,
            Error::WorkerSpawn(e) => Some(e),
            Error::InvalidAddressFamily(_) => None,
            Error::AddressListDesync => None,
            Error::NoRouteAvailable => None,
            Error::RemoteClosed => None,
            Error::SocketError(e) => Some(e),
            Error::ResolutionDispatchFailure(_) => None,
            Error::Timeout => None,
            Error::NotConnected => None,
            Error::Settings(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Settings(Arc::new(err))
    }
}
