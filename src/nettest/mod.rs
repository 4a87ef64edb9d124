//! Network tests and their results.
//!
//! A network test is anything implementing [`NetTest`]. The scheduler only
//! cares about two things: that a test can be started and ended, and that
//! it has an identity so it can be tracked while running. The latter is
//! provided by [`TestRef`] which compares tests by the address of their
//! shared allocation.

#![warn(missing_docs)]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

pub use self::tcp_connect::TcpConnect;

mod tcp_connect;

//------------ NetTest --------------------------------------------------------

/// A callback telling the scheduler that a step of a test is done.
pub type Callback = Box<dyn FnOnce() + Send>;

/// A network test.
///
/// Both methods are called on the thread driving the reactor. Each must
/// eventually invoke its callback exactly once, either right away or from
/// some later reactor operation.
pub trait NetTest: Send + Sync {
    /// Starts the test.
    fn begin(&self, on_started: Callback);

    /// Finishes the test after `begin` has reported back.
    fn end(&self, on_finished: Callback);
}

//------------ TestRef --------------------------------------------------------

/// A shared reference to a test, compared by identity.
///
/// Two references are equal if they point to the same test, regardless of
/// whether the tests themselves would compare equal.
#[derive(Clone)]
pub struct TestRef(Arc<dyn NetTest>);

impl TestRef {
    /// Creates a reference from a shared test.
    pub fn new(test: Arc<dyn NetTest>) -> Self {
        TestRef(test)
    }

    /// Returns the address identifying the test.
    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl<T: NetTest + 'static> From<Arc<T>> for TestRef {
    fn from(test: Arc<T>) -> Self {
        TestRef(test)
    }
}

impl Deref for TestRef {
    type Target = dyn NetTest;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for TestRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for TestRef {}

impl Hash for TestRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl fmt::Debug for TestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TestRef").field(&self.addr()).finish()
    }
}

//------------ Entry ----------------------------------------------------------

/// The result record of a test.
///
/// An entry is a flat JSON object. Tests add whatever keys they need.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Entry(Map<String, Value>);

impl Entry {
    /// Creates a new, empty entry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the value of a key, replacing any earlier value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the value of a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the value of a key if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Returns whether the entry has no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes the entry into a JSON string.
    pub fn dumps(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an entry from a JSON string.
    pub fn loads(s: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(s)?)
    }
}

//============ Tests =========================================================
