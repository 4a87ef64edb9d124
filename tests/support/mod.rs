//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use netprobe::error::Error;
use netprobe::net::dialer::{Dialer, Handlers};
use netprobe::reactor::Reactor;
use parking_lot::Mutex;

/// Drives the reactor until `done` returns true.
///
/// Panics if that takes longer than five seconds.
pub fn drive(reactor: &Reactor, done: impl Fn() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out");
        reactor.call_later(Duration::from_millis(20), || {});
        reactor.run_once();
    }
}

/// Drives the reactor for the given time.
pub fn idle(reactor: &Reactor, duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        reactor.call_later(Duration::from_millis(10), || {});
        reactor.run_once();
    }
}

/// What a dialer reported.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Seen {
    Connect,
    Data(Vec<u8>),
    Flush,
    Error(&'static str),
}

/// Records everything a dialer reports.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
    dialer: Arc<Mutex<Option<Dialer>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns handlers recording into this recorder.
    ///
    /// `on_connect` is run after recording the connect.
    pub fn handlers(
        &self,
        on_connect: impl Fn(&Dialer) + Send + Sync + 'static,
    ) -> Handlers {
        let connect = self.clone();
        let data = self.clone();
        let flush = self.clone();
        let error = self.clone();
        Handlers::new()
            .on_connect(move || {
                connect.seen.lock().push(Seen::Connect);
                if let Some(dialer) = connect.dialer.lock().clone() {
                    on_connect(&dialer)
                }
            })
            .on_data(move |bytes| {
                data.seen.lock().push(Seen::Data(bytes.to_vec()))
            })
            .on_flush(move || flush.seen.lock().push(Seen::Flush))
            .on_error(move |err: Error| {
                error.seen.lock().push(Seen::Error(err.failure_str()))
            })
    }

    /// Remembers the dialer so handlers can use it.
    pub fn attach(&self, dialer: &Dialer) {
        *self.dialer.lock() = Some(dialer.clone());
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    /// Returns all received data concatenated.
    pub fn data(&self) -> Vec<u8> {
        self.seen
            .lock()
            .iter()
            .filter_map(|seen| match seen {
                Seen::Data(data) => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn count(&self, what: &Seen) -> usize {
        self.seen.lock().iter().filter(|seen| *seen == what).count()
    }

    pub fn errors(&self) -> Vec<&'static str> {
        self.seen
            .lock()
            .iter()
            .filter_map(|seen| match seen {
                Seen::Error(err) => Some(*err),
                _ => None,
            })
            .collect()
    }
}
