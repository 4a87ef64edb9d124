//! Resolving host names into candidate addresses.
//!
//! A [`Resolver`] issues a single address query, either for A or AAAA
//! records, and reports the outcome through a callback. The callback is
//! run on the reactor thread, at most once, and never after the query has
//! been cancelled through its [`Query`] handle.
//!
//! Two resolvers are provided: [`HostsResolver`] answers from a static
//! host table, [`StubResolver`] sends real DNS queries to the system's
//! configured name servers.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::AbortHandle;

use crate::error::Error;
use crate::net::addr::RecordType;

pub use self::hosts::{Hosts, HostsResolver};
#[cfg(feature = "resolv")]
pub use self::stub::StubResolver;

//------------ Sub-modules ---------------------------------------------------

mod hosts;
#[cfg(feature = "resolv")]
mod stub;

//------------ Resolver ------------------------------------------------------

/// The callback receiving the outcome of a query.
pub type ResolveCallback = Box<dyn FnOnce(Status, Vec<IpAddr>) + Send>;

/// A type that can resolve host names.
pub trait Resolver: Send + Sync {
    /// Starts resolving `name` for records of type `rtype`.
    ///
    /// Returns an error if the query could not even be started. Otherwise
    /// `on_result` will eventually be called on the reactor thread unless
    /// the returned query is cancelled first.
    fn resolve(
        &self,
        rtype: RecordType,
        name: &str,
        on_result: ResolveCallback,
    ) -> Result<Query, Error>;
}

impl<R: Resolver + ?Sized> Resolver for Arc<R> {
    fn resolve(
        &self,
        rtype: RecordType,
        name: &str,
        on_result: ResolveCallback,
    ) -> Result<Query, Error> {
        (**self).resolve(rtype, name, on_result)
    }
}

//------------ Status --------------------------------------------------------

/// The outcome of a query.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// The query was answered with at least one address.
    Ok,

    /// The name exists but has no addresses of the requested family.
    NoData,

    /// The name does not exist.
    NotExist,

    /// The name server failed to answer the query.
    ServerFailed,

    /// No answer arrived in time.
    Timeout,

    /// The query failed for some other reason.
    Failed,
}

impl Status {
    /// Returns whether a name server gave some kind of answer.
    pub fn is_answer(self) -> bool {
        matches!(
            self,
            Status::Ok | Status::NoData | Status::NotExist | Status::ServerFailed
        )
    }

    /// Derives a status from an I/O error returned by a lookup.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Status::Timeout,
            io::ErrorKind::NotFound => Status::NotExist,
            _ => Status::Failed,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "ok",
            Status::NoData => "no data",
            Status::NotExist => "name does not exist",
            Status::ServerFailed => "server failure",
            Status::Timeout => "timeout",
            Status::Failed => "failed",
        })
    }
}

//------------ Query ---------------------------------------------------------

/// A handle to an in-flight query.
///
/// Dropping the handle does not cancel the query.
#[derive(Debug)]
pub struct Query {
    /// Shared with the completion, set once cancelled.
    cancelled: Arc<AtomicBool>,

    /// The task performing the lookup, if any.
    task: Option<AbortHandle>,
}

impl Query {
    /// Creates a new query and the completion for delivering its result.
    pub fn new(on_result: ResolveCallback) -> (Self, Completion) {
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            Query {
                cancelled: cancelled.clone(),
                task: None,
            },
            Completion {
                cancelled,
                on_result,
            },
        )
    }

    /// Attaches the task performing the lookup.
    ///
    /// The task is aborted when the query is cancelled.
    pub fn with_task(mut self, task: AbortHandle) -> Self {
        self.task = Some(task);
        self
    }

    /// Cancels the query.
    ///
    /// This is idempotent and safe after the result has been delivered.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.as_ref() {
            task.abort();
        }
    }

    /// Returns whether the query has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

//------------ Completion ----------------------------------------------------

/// Delivers the result of a query unless it has been cancelled.
pub struct Completion {
    /// Shared with the query handle.
    cancelled: Arc<AtomicBool>,

    /// The caller's callback.
    on_result: ResolveCallback,
}

impl Completion {
    /// Delivers the result.
    ///
    /// Must be called on the reactor thread. Does nothing if the query was
    /// cancelled.
    pub fn complete(self, status: Status, addrs: Vec<IpAddr>) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        (self.on_result)(status, addrs)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancelled_query_never_delivers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = calls.clone();
        let (query, completion) = Query::new(Box::new(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        query.cancel();
        query.cancel();
        assert!(query.is_cancelled());
        completion.complete(Status::Ok, vec!["192.0.2.1".parse().unwrap()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn completion_delivers_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = calls.clone();
        let (query, completion) = Query::new(Box::new(move |status, addrs| {
            assert_eq!(status, Status::NoData);
            assert!(addrs.is_empty());
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        completion.complete(Status::NoData, Vec::new());
        query.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_from_io() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(Status::from_io(&err), Status::Timeout);
        assert!(!Status::Timeout.is_answer());
        assert!(Status::NotExist.is_answer());
    }
}
