//! Checking whether a TCP connection can be established.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{Callback, Entry, NetTest};
use crate::config::Settings;
use crate::error::Error;
use crate::net::dialer::{self, Dialer, Handlers};
use crate::net::resolver::Resolver;
use crate::reactor::SharedReactor;

/// The port used if neither the input nor the options name one.
const DEFAULT_PORT: u16 = 80;

//------------ TcpConnect -----------------------------------------------------

/// A test connecting to a single endpoint.
///
/// The input is a host name or address, optionally followed by a colon and
/// a port. IPv6 addresses with a port need to be put in brackets. The
/// result is recorded in an [`Entry`] with the keys `input`, `connection`
/// (either `"success"` or the kind of failure) and `attempts` (the number
/// of addresses tried).
pub struct TcpConnect {
    /// The reactor to connect on.
    reactor: SharedReactor,

    /// The resolver for host names.
    resolver: Arc<dyn Resolver>,

    /// The endpoint to connect to.
    input: String,

    /// The task settings.
    settings: Settings,

    /// The result.
    entry: Arc<Mutex<Entry>>,
}

impl TcpConnect {
    /// Creates a new test for the given input.
    pub fn new(
        reactor: SharedReactor,
        resolver: Arc<dyn Resolver>,
        input: impl Into<String>,
        settings: Settings,
    ) -> Self {
        TcpConnect {
            reactor,
            resolver,
            input: input.into(),
            settings,
            entry: Default::default(),
        }
    }

    /// Returns the input.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Returns the result recorded so far.
    pub fn entry(&self) -> Entry {
        self.entry.lock().clone()
    }
}

impl NetTest for TcpConnect {
    fn begin(&self, on_started: Callback) {
        let default_port = self.settings.options.port.unwrap_or(DEFAULT_PORT);
        let (host, port) = split_input(&self.input, default_port);
        let mut config = dialer::Config::new();
        if let Some(limit) = self.settings.options.max_runtime() {
            config.set_connect_timeout(limit);
        }

        let run = Arc::new(Run {
            input: self.input.clone(),
            entry: self.entry.clone(),
            dialer: Mutex::new(None),
            on_started: Mutex::new(Some(on_started)),
        });
        let connected = run.clone();
        let failed = run.clone();
        let handlers = Handlers::new()
            .on_connect(move || connected.finish(None))
            .on_error(move |err| failed.finish(Some(err)));
        let dialer = Dialer::with_config(
            self.reactor.clone(),
            self.resolver.clone(),
            handlers,
            config,
        );
        *run.dialer.lock() = Some(dialer.clone());
        debug!("tcp_connect: connecting to {} port {}", host, port);
        dialer.connect(
            &host,
            &port,
            self.settings.options.address_family.as_str(),
        );
    }

    fn end(&self, on_finished: Callback) {
        on_finished()
    }
}

//------------ Run ------------------------------------------------------------

/// The state of a single run of the test.
struct Run {
    /// The input, for the entry.
    input: String,

    /// Where the result goes.
    entry: Arc<Mutex<Entry>>,

    /// The dialer, until the run is finished.
    dialer: Mutex<Option<Dialer>>,

    /// Tells the scheduler the run is finished.
    on_started: Mutex<Option<Callback>>,
}

impl Run {
    /// Records the outcome and reports back.
    fn finish(&self, err: Option<Error>) {
        let dialer = self.dialer.lock().take();
        {
            let mut entry = self.entry.lock();
            entry.set("input", self.input.clone());
            entry.set(
                "connection",
                match err.as_ref() {
                    None => "success",
                    Some(err) => err.failure_str(),
                },
            );
            entry.set(
                "attempts",
                dialer.as_ref().map_or(0, |dialer| dialer.attempts()),
            );
        }
        match err {
            None => debug!("tcp_connect: {} connected", self.input),
            Some(err) => debug!("tcp_connect: {} failed: {}", self.input, err),
        }
        if let Some(dialer) = dialer {
            dialer.close()
        }
        if let Some(op) = self.on_started.lock().take() {
            op()
        }
    }
}

/// Splits an input into host and port.
fn split_input(input: &str, default_port: u16) -> (String, String) {
    if let Some(rest) = input.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = match tail.strip_prefix(':') {
                Some(port) if !port.is_empty() => port.to_string(),
                _ => default_port.to_string(),
            };
            return (host.to_string(), port);
        }
    }
    match input.split_once(':') {
        Some((host, port)) if !port.contains(':') && !port.is_empty() => {
            (host.to_string(), port.to_string())
        }
        Some((host, port)) if port.is_empty() => {
            (host.to_string(), default_port.to_string())
        }
        _ => (input.to_string(), default_port.to_string()),
    }
}

//============ Tests =========================================================
