//! Establishing outbound TCP connections.
//!
//! A [`Dialer`] owns a single outbound connection attempt. Given a host
//! name, a port and an address family hint, it resolves the name into a
//! list of candidate addresses, tries the candidates in order until one of
//! them accepts the connection, and then shuttles data between the socket
//! and its owner.
//!
//! All results are reported through the [`Handlers`] given when creating
//! the dialer. The handlers are always invoked on the thread driving the
//! reactor and never while the dialer's internal state is locked, so they
//! may freely call back into the dialer, for instance to write data or to
//! close it.
//!
//! # Lifecycle
//!
//! A dialer starts out [`Idle`][Phase::Idle]. [`connect()`][Dialer::connect]
//! moves it to [`Resolving`][Phase::Resolving] unless the host is a literal
//! address, then to [`Racing`][Phase::Racing] while candidates are tried
//! and finally to [`Connected`][Phase::Connected]. Any error reported via
//! `on_error` moves it to [`Failed`][Phase::Failed] and stops all I/O.
//! [`close()`][Dialer::close] moves it to [`Closed`][Phase::Closed] from
//! any phase.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt;
use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::net::addr::{CandidateList, Family, FamilyHint, RecordType};
use crate::net::resolver::{Query, Resolver, Status};
use crate::reactor::{Poster, Reactor};
use crate::utils::DefMinMax;

//------------ Configuration Constants ----------------------------------------

/// How long a single candidate may take to accept a connection.
///
/// Expiry counts as a failure of that candidate and the next one is tried.
const CONNECT_TIMEOUT: DefMinMax<Duration> = DefMinMax::new(
    Duration::from_secs(10),
    Duration::from_millis(1),
    Duration::from_secs(600),
);

/// The amount of buffer space reserved for each read.
const READ_BUFFER_SIZE: DefMinMax<usize> =
    DefMinMax::new(8192, 512, 1024 * 1024);

//------------ Config ---------------------------------------------------------

/// Configuration for a dialer.
#[derive(Clone, Debug)]
pub struct Config {
    /// Timeout for connecting to a single candidate.
    connect_timeout: Duration,

    /// Buffer space reserved for each read.
    read_buffer_size: usize,
}

impl Config {
    /// Creates a new, default config.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the per-candidate connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Sets the per-candidate connect timeout.
    ///
    /// Excessive values are quietly trimmed.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = CONNECT_TIMEOUT.limit(timeout)
    }

    /// Returns the read buffer size.
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Sets the read buffer size.
    ///
    /// Excessive values are quietly trimmed.
    pub fn set_read_buffer_size(&mut self, size: usize) {
        self.read_buffer_size = READ_BUFFER_SIZE.limit(size)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT.default(),
            read_buffer_size: READ_BUFFER_SIZE.default(),
        }
    }
}

//------------ Handlers -------------------------------------------------------

/// The callbacks through which a dialer reports to its owner.
///
/// Unset handlers are simply skipped.
#[derive(Default)]
pub struct Handlers {
    /// Called once the connection is established.
    on_connect: Option<Box<dyn Fn() + Send + Sync>>,

    /// Called with newly received data.
    on_data: Option<Box<dyn Fn(Bytes) + Send + Sync>>,

    /// Called when all queued data has been written.
    on_flush: Option<Box<dyn Fn() + Send + Sync>>,

    /// Called at most once when the connection fails.
    on_error: Option<Box<dyn Fn(Error) + Send + Sync>>,
}

impl Handlers {
    /// Creates an empty set of handlers.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the handler called once the connection is established.
    pub fn on_connect(
        mut self,
        op: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Box::new(op));
        self
    }

    /// Sets the handler called with newly received data.
    pub fn on_data(
        mut self,
        op: impl Fn(Bytes) + Send + Sync + 'static,
    ) -> Self {
        self.on_data = Some(Box::new(op));
        self
    }

    /// Sets the handler called when the write queue has drained.
    pub fn on_flush(mut self, op: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_flush = Some(Box::new(op));
        self
    }

    /// Sets the handler called when the connection fails.
    pub fn on_error(
        mut self,
        op: impl Fn(Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(op));
        self
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_data", &self.on_data.is_some())
            .field("on_flush", &self.on_flush.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

//------------ Phase ----------------------------------------------------------

/// The lifecycle phase of a dialer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// `connect()` has not yet taken effect.
    Idle,

    /// Waiting for a resolver answer.
    Resolving,

    /// Trying candidate addresses.
    Racing,

    /// The connection is established.
    Connected,

    /// An error has been reported; no further events will be delivered.
    Failed,

    /// The dialer has been closed.
    Closed,
}

//------------ Target ---------------------------------------------------------

/// Where a dialer connects to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    /// The host name or literal address.
    hostname: String,

    /// The port in textual form.
    port: String,

    /// The address family hint in textual form.
    family: String,
}

impl Target {
    /// Creates a new target.
    pub fn new(
        hostname: impl Into<String>,
        port: impl Into<String>,
        family: impl Into<String>,
    ) -> Self {
        Target {
            hostname: hostname.into(),
            port: port.into(),
            family: family.into(),
        }
    }

    /// Returns the host name.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the port.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Returns the family hint.
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Returns the host as a literal address if it is one.
    fn literal(&self) -> Option<IpAddr> {
        self.hostname
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .ok()
    }
}

//------------ Dialer ---------------------------------------------------------

/// A single outbound TCP connection attempt.
///
/// Dialers are cheap to clone. All clones refer to the same connection.
#[derive(Clone)]
pub struct Dialer {
    /// The shared connection state.
    inner: Arc<Inner>,
}

impl Dialer {
    /// Creates a new dialer with default configuration.
    pub fn new(
        reactor: Arc<Reactor>,
        resolver: Arc<dyn Resolver>,
        handlers: Handlers,
    ) -> Self {
        Self::with_config(reactor, resolver, handlers, Config::default())
    }

    /// Creates a new dialer with the given configuration.
    pub fn with_config(
        reactor: Arc<Reactor>,
        resolver: Arc<dyn Resolver>,
        handlers: Handlers,
        config: Config,
    ) -> Self {
        let (read_ctl, _) = watch::channel(ReadControl::default());
        Dialer {
            inner: Arc::new(Inner {
                reactor,
                resolver,
                config,
                handlers: Mutex::new(Some(Arc::new(handlers))),
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    target: None,
                    candidates: CandidateList::new(),
                    fallback: None,
                    query: None,
                    generation: 0,
                    attempts: 0,
                    connect_task: None,
                    io: None,
                    peer: None,
                    read_ctl,
                }),
            }),
        }
    }

    /// Starts connecting to `hostname` and `port`.
    ///
    /// The `family` is the textual form of a [`FamilyHint`]. An
    /// unrecognized hint is reported through `on_error` as
    /// [`Error::InvalidAddressFamily`].
    ///
    /// The work starts during the next reactor iteration. The result is
    /// reported via either `on_connect` or `on_error`. Calling this on a
    /// dialer that has been started before has no effect.
    pub fn connect(&self, hostname: &str, port: &str, family: &str) {
        let target = Target::new(hostname, port, family);
        let weak = Arc::downgrade(&self.inner);
        self.inner.reactor.call_soon(move || {
            if let Some(inner) = weak.upgrade() {
                inner.start(target)
            }
        });
    }

    /// Starts connecting using a typed family hint.
    pub fn connect_with_hint(&self, hostname: &str, port: u16, hint: FamilyHint) {
        self.connect(hostname, &port.to_string(), hint.as_str())
    }

    /// Queues data for writing.
    ///
    /// Once everything queued has been written, `on_flush` is called.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        let state = self.inner.state.lock();
        match (state.phase, state.io.as_ref()) {
            (Phase::Connected, Some(io)) => {
                io.tx.send(data.into()).map_err(|_| Error::NotConnected)
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// Resumes delivering received data.
    ///
    /// Reading is enabled initially.
    pub fn enable_read(&self) {
        self.inner.update_read(|ctl| ctl.enabled = true)
    }

    /// Stops delivering received data until reading is enabled again.
    pub fn disable_read(&self) {
        self.inner.update_read(|ctl| ctl.enabled = false)
    }

    /// Fails the connection if no data arrives for `timeout`.
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.update_read(|ctl| ctl.timeout = Some(timeout))
    }

    /// Removes a timeout set earlier.
    pub fn clear_timeout(&self) {
        self.inner.update_read(|ctl| ctl.timeout = None)
    }

    /// Closes the dialer.
    ///
    /// Cancels any pending resolution and releases the socket. This is
    /// idempotent and may be called from within any handler.
    pub fn close(&self) {
        self.inner.close()
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Returns the number of connect attempts issued so far.
    pub fn attempts(&self) -> usize {
        self.inner.state.lock().attempts
    }

    /// Returns the address of the peer once connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.state.lock().peer
    }

    /// Returns the target of the connection once started.
    pub fn target(&self) -> Option<Target> {
        self.inner.state.lock().target.clone()
    }
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Dialer")
            .field("phase", &state.phase)
            .field("target", &state.target)
            .field("attempts", &state.attempts)
            .finish()
    }
}

//------------ Inner ----------------------------------------------------------

/// The shared part of a dialer.
///
/// Tasks and posted operations only ever hold a weak reference to it.
struct Inner {
    /// The reactor all I/O happens on.
    reactor: Arc<Reactor>,

    /// The resolver for host names.
    resolver: Arc<dyn Resolver>,

    /// The configuration.
    config: Config,

    /// The owner's handlers. Dropped on close.
    handlers: Mutex<Option<Arc<Handlers>>>,

    /// The connection state.
    state: Mutex<State>,
}

/// The mutable connection state.
struct State {
    /// Current lifecycle phase.
    phase: Phase,

    /// Where we are connecting to, set once started.
    target: Option<Target>,

    /// The addresses to try.
    candidates: CandidateList,

    /// The query still to issue after the current one.
    fallback: Option<RecordType>,

    /// The outstanding query.
    query: Option<Query>,

    /// Identifies the current connect attempt.
    ///
    /// Events carrying a different generation are stale and ignored.
    generation: u64,

    /// Number of connect attempts issued.
    attempts: usize,

    /// The task of the current connect attempt.
    connect_task: Option<AbortHandle>,

    /// The I/O tasks of the established connection.
    io: Option<Io>,

    /// The peer of the established connection.
    peer: Option<SocketAddr>,

    /// Control for the reader task.
    read_ctl: watch::Sender<ReadControl>,
}

/// The I/O tasks of an established connection.
///
/// Each task owns one half of the socket. Aborted tasks are only dropped
/// when the reactor runs next, so the socket is shut down through `sock`
/// right away.
struct Io {
    /// The reading task.
    reader: AbortHandle,

    /// The writing task.
    writer: AbortHandle,

    /// The write queue.
    tx: UnboundedSender<Bytes>,

    /// Another handle on the socket.
    sock: std::net::TcpStream,
}

/// Settings for the reader task.
#[derive(Clone, Copy, Debug)]
struct ReadControl {
    /// Whether to read at all.
    enabled: bool,

    /// Maximum time to wait for data.
    timeout: Option<Duration>,
}

impl Default for ReadControl {
    fn default() -> Self {
        ReadControl {
            enabled: true,
            timeout: None,
        }
    }
}

/// Something that happened on the socket.
enum Event {
    /// The connect attempt succeeded.
    Connected(TcpStream),

    /// Data has arrived.
    Data(Bytes),

    /// The write queue has drained.
    Flushed,

    /// The peer closed the connection.
    Eof,

    /// The connect attempt or an established connection failed.
    Failed(io::Error),

    /// No data arrived within the read timeout.
    TimedOut,
}

/// What to tell the owner once the state lock is released.
enum Notify {
    /// Call `on_connect`.
    Connect,

    /// Call `on_data`.
    Data(Bytes),

    /// Call `on_flush`.
    Flush,

    /// Call `on_error`.
    Error(Error),
}

impl Inner {
    /// Begins connecting. Runs on the reactor.
    fn start(self: &Arc<Self>, target: Target) {
        let note = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Idle => {}
                Phase::Closed => {
                    debug!("dialer: closed before connecting, ignoring");
                    return;
                }
                _ => {
                    warn!("dialer: connect called twice, ignoring");
                    return;
                }
            }
            self.start_locked(&mut state, target)
        };
        self.deliver(note)
    }

    /// Begins connecting with the state locked.
    fn start_locked(
        self: &Arc<Self>,
        state: &mut State,
        target: Target,
    ) -> Option<Notify> {
        if let Some(addr) = target.literal() {
            let family = Family::of(&addr);
            debug!("dialer: literal address {} ({})", addr, family);
            state.target = Some(target);
            state.phase = Phase::Racing;
            if let Err(err) = state.candidates.push(addr, family) {
                return self.fail(state, err);
            }
            return self.connect_next(state);
        }

        let hint = match target.family.parse::<FamilyHint>() {
            Ok(hint) => hint,
            Err(err) => {
                warn!("dialer: invalid address family '{}'", target.family);
                state.target = Some(target);
                return self.fail(state, err);
            }
        };
        let hostname = target.hostname.clone();
        state.target = Some(target);
        state.phase = Phase::Resolving;
        state.fallback = hint.fallback_query();
        match self.start_query(state, hint.first_query(), &hostname) {
            Ok(()) => None,
            Err(err) => self.fail(state, err),
        }
    }

    /// Asks the resolver for addresses of one family.
    fn start_query(
        self: &Arc<Self>,
        state: &mut State,
        rtype: RecordType,
        hostname: &str,
    ) -> Result<(), Error> {
        debug!("dialer: resolving {} {}", rtype, hostname);
        let weak = Arc::downgrade(self);
        let query = self.resolver.resolve(
            rtype,
            hostname,
            Box::new(move |status, addrs| {
                if let Some(inner) = weak.upgrade() {
                    inner.resolved(rtype, status, addrs)
                }
            }),
        )?;
        state.query = Some(query);
        Ok(())
    }

    /// Processes a resolver answer. Runs on the reactor.
    fn resolved(
        self: &Arc<Self>,
        rtype: RecordType,
        status: Status,
        addrs: Vec<IpAddr>,
    ) {
        let note = {
            let mut state = self.state.lock();
            if state.phase != Phase::Resolving {
                trace!("dialer: ignoring late {} answer", rtype);
                return;
            }
            state.query = None;
            self.resolved_locked(&mut state, rtype, status, addrs)
        };
        self.deliver(note)
    }

    /// Processes a resolver answer with the state locked.
    fn resolved_locked(
        self: &Arc<Self>,
        state: &mut State,
        rtype: RecordType,
        status: Status,
        addrs: Vec<IpAddr>,
    ) -> Option<Notify> {
        if status == Status::Ok {
            let family = rtype.family();
            for addr in addrs {
                if Family::of(&addr) != family {
                    warn!("dialer: ignoring {} in {} answer", addr, rtype);
                    continue;
                }
                debug!("dialer: candidate {} {}", family, addr);
                if let Err(err) = state.candidates.push(addr, family) {
                    warn!("dialer: cannot append candidate");
                    return self.fail(state, err);
                }
            }
        } else {
            debug!("dialer: {} query: {}", rtype, status);
        }

        if let Some(next) = state.fallback.take() {
            let hostname = state
                .target
                .as_ref()
                .map(|target| target.hostname.clone())
                .unwrap_or_default();
            match self.start_query(state, next, &hostname) {
                Ok(()) => return None,
                Err(err) => {
                    debug!("dialer: cannot start {} query: {}", next, err)
                }
            }
        }

        state.phase = Phase::Racing;
        self.connect_next(state)
    }

    /// Starts connecting to the next usable candidate.
    fn connect_next(self: &Arc<Self>, state: &mut State) -> Option<Notify> {
        loop {
            let (addr, family) = match state.candidates.next_candidate() {
                Ok(Some(candidate)) => candidate,
                Ok(None) => break,
                Err(err) => return self.fail(state, err),
            };
            let port = match state
                .target
                .as_ref()
                .and_then(|target| target.port.parse::<u16>().ok())
            {
                Some(port) => port,
                None => {
                    debug!("dialer: invalid port, skipping {}", addr);
                    continue;
                }
            };
            let socket = match family {
                Family::Inet => TcpSocket::new_v4(),
                Family::Inet6 => TcpSocket::new_v6(),
            };
            let socket = match socket {
                Ok(socket) => socket,
                Err(err) => {
                    debug!("dialer: cannot create {} socket: {}", family, err);
                    continue;
                }
            };
            let addr = SocketAddr::new(addr, port);
            state.generation += 1;
            state.attempts += 1;
            debug!("dialer: connecting to {} ({})", addr, family);

            let generation = state.generation;
            let poster = self.reactor.poster();
            let weak = Arc::downgrade(self);
            let timeout = self.config.connect_timeout;
            let task = self.reactor.spawn(async move {
                let event = match tokio::time::timeout(
                    timeout,
                    socket.connect(addr),
                )
                .await
                {
                    Ok(Ok(stream)) => Event::Connected(stream),
                    Ok(Err(err)) => Event::Failed(err),
                    Err(_) => Event::Failed(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect timed out",
                    )),
                };
                post(&poster, &weak, generation, event);
            });
            state.connect_task = Some(task.abort_handle());
            return None;
        }

        warn!("dialer: no more available addresses");
        self.fail(state, Error::NoRouteAvailable)
    }

    /// Processes a socket event. Runs on the reactor.
    fn handle_event(self: &Arc<Self>, generation: u64, event: Event) {
        let note = {
            let mut state = self.state.lock();
            if generation != state.generation
                || matches!(state.phase, Phase::Failed | Phase::Closed)
            {
                trace!("dialer: ignoring stale event");
                return;
            }
            match event {
                Event::Connected(stream) => {
                    state.connect_task = None;
                    match self.established(&mut state, stream, generation) {
                        Ok(()) => Some(Notify::Connect),
                        Err(err) => self.fail(
                            &mut state,
                            Error::SocketError(Arc::new(err)),
                        ),
                    }
                }
                Event::Eof => self.fail(&mut state, Error::RemoteClosed),
                Event::Failed(err) if state.phase == Phase::Racing => {
                    debug!("dialer: attempt failed ({}), trying next", err);
                    state.connect_task = None;
                    self.connect_next(&mut state)
                }
                Event::Failed(err) => {
                    self.fail(&mut state, Error::SocketError(Arc::new(err)))
                }
                Event::Data(data) => Some(Notify::Data(data)),
                Event::Flushed => Some(Notify::Flush),
                Event::TimedOut => self.fail(&mut state, Error::Timeout),
            }
        };
        self.deliver(note)
    }

    /// Sets up the I/O tasks for an established connection.
    ///
    /// Must be called within the reactor's runtime.
    fn established(
        self: &Arc<Self>,
        state: &mut State,
        stream: TcpStream,
        generation: u64,
    ) -> Result<(), io::Error> {
        // Keep a second handle on the socket so that releasing can shut it
        // down even while the tasks owning the halves are still around.
        let stream = stream.into_std()?;
        let sock = stream.try_clone()?;
        let stream = TcpStream::from_std(stream)?;

        state.phase = Phase::Connected;
        state.peer = stream.peer_addr().ok();
        debug!("dialer: connected to {:?}", state.peer);

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let poster = self.reactor.poster();
        let weak = Arc::downgrade(self);
        let reader = self.reactor.spawn(read_loop(
            read_half,
            state.read_ctl.subscribe(),
            self.config.read_buffer_size,
            poster.clone(),
            weak.clone(),
            generation,
        ));
        let writer = self.reactor.spawn(write_loop(
            write_half, rx, poster, weak, generation,
        ));
        state.io = Some(Io {
            reader: reader.abort_handle(),
            writer: writer.abort_handle(),
            tx,
            sock,
        });
        Ok(())
    }

    /// Moves to the failed phase and returns the error to report.
    fn fail(&self, state: &mut State, err: Error) -> Option<Notify> {
        debug!("dialer: failed: {}", err);
        state.phase = Phase::Failed;
        Self::release(state);
        Some(Notify::Error(err))
    }

    /// Cancels resolution and stops all tasks.
    fn release(state: &mut State) {
        state.fallback = None;
        if let Some(query) = state.query.take() {
            trace!("dialer: cancelling query");
            query.cancel();
        }
        if let Some(task) = state.connect_task.take() {
            task.abort();
        }
        if let Some(io) = state.io.take() {
            trace!("dialer: releasing socket");
            io.reader.abort();
            io.writer.abort();
            if let Err(err) = io.sock.shutdown(Shutdown::Both) {
                trace!("dialer: shutting down socket: {}", err);
            }
        }
    }

    /// Closes the dialer.
    fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return;
            }
            debug!("dialer: closing");
            state.phase = Phase::Closed;
            Self::release(&mut state);
        }
        self.handlers.lock().take();
    }

    /// Changes the reader's settings.
    fn update_read(&self, op: impl FnOnce(&mut ReadControl)) {
        self.state.lock().read_ctl.send_modify(op)
    }

    /// Invokes the handler for a notification.
    fn deliver(&self, note: Option<Notify>) {
        let note = match note {
            Some(note) => note,
            None => return,
        };
        let handlers = match self.handlers.lock().clone() {
            Some(handlers) => handlers,
            None => return,
        };
        match note {
            Notify::Connect => {
                if let Some(op) = handlers.on_connect.as_ref() {
                    op()
                }
            }
            Notify::Data(data) => {
                if let Some(op) = handlers.on_data.as_ref() {
                    op(data)
                }
            }
            Notify::Flush => {
                if let Some(op) = handlers.on_flush.as_ref() {
                    op()
                }
            }
            Notify::Error(err) => {
                if let Some(op) = handlers.on_error.as_ref() {
                    op(err)
                }
            }
        }
    }
}

//------------ Tasks ----------------------------------------------------------

/// Posts a socket event to the reactor.
fn post(poster: &Poster, weak: &Weak<Inner>, generation: u64, event: Event) {
    let weak = weak.clone();
    poster.call_soon(move || {
        if let Some(inner) = weak.upgrade() {
            inner.handle_event(generation, event)
        }
    });
}

/// Reads from the socket until it fails or is closed.
async fn read_loop(
    mut sock: OwnedReadHalf,
    mut ctl: watch::Receiver<ReadControl>,
    buffer_size: usize,
    poster: Poster,
    weak: Weak<Inner>,
    generation: u64,
) {
    let mut buf = BytesMut::with_capacity(buffer_size);
    loop {
        let current = *ctl.borrow_and_update();
        if !current.enabled {
            if ctl.changed().await.is_err() {
                return;
            }
            continue;
        }
        buf.reserve(buffer_size);
        let read = async {
            match current.timeout {
                Some(timeout) => {
                    tokio::time::timeout(timeout, sock.read_buf(&mut buf))
                        .await
                        .ok()
                }
                None => Some(sock.read_buf(&mut buf).await),
            }
        };
        let res = tokio::select! {
            res = read => res,
            changed = ctl.changed() => {
                if changed.is_err() {
                    return
                }
                continue
            }
        };
        let event = match res {
            None => Event::TimedOut,
            Some(Ok(0)) => Event::Eof,
            Some(Ok(_)) => Event::Data(buf.split().freeze()),
            Some(Err(err)) => Event::Failed(err),
        };
        let done = !matches!(event, Event::Data(_));
        post(&poster, &weak, generation, event);
        if done {
            return;
        }
    }
}

/// Writes queued data to the socket.
async fn write_loop(
    mut sock: OwnedWriteHalf,
    mut rx: UnboundedReceiver<Bytes>,
    poster: Poster,
    weak: Weak<Inner>,
    generation: u64,
) {
    while let Some(mut data) = rx.recv().await {
        loop {
            if let Err(err) = sock.write_all(&data).await {
                post(&poster, &weak, generation, Event::Failed(err));
                return;
            }
            match rx.try_recv() {
                Ok(more) => data = more,
                Err(_) => break,
            }
        }
        post(&poster, &weak, generation, Event::Flushed);
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::resolver::{Hosts, HostsResolver};
    use std::time::Instant;

    /// Records what the handlers saw.
    fn recording_handlers(log: Arc<Mutex<Vec<String>>>) -> Handlers {
        let connect = log.clone();
        let data = log.clone();
        let flush = log.clone();
        Handlers::new()
            .on_connect(move || connect.lock().push("connect".into()))
            .on_data(move |bytes| data.lock().push(format!("data:{}", bytes.len())))
            .on_flush(move || flush.lock().push("flush".into()))
            .on_error(move |err| log.lock().push(format!("error:{}", err.failure_str())))
    }

    /// Drives the reactor until `done` returns true or five seconds pass.
    fn drive(reactor: &Reactor, done: impl Fn() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            reactor.call_later(Duration::from_millis(50), || {});
            reactor.run_once();
        }
    }

    fn setup(
        hosts: &str,
    ) -> (Arc<Reactor>, Arc<HostsResolver>, Dialer, Arc<Mutex<Vec<String>>>) {
        let reactor = Arc::new(Reactor::new().unwrap());
        let resolver = Arc::new(HostsResolver::new(
            &reactor,
            hosts.parse::<Hosts>().unwrap(),
        ));
        let log = Arc::new(Mutex::new(Vec::new()));
        let dialer = Dialer::new(
            reactor.clone(),
            resolver.clone(),
            recording_handlers(log.clone()),
        );
        (reactor, resolver, dialer, log)
    }

    #[test]
    fn prefer_ipv4_falls_back_to_aaaa_then_fails() {
        let (reactor, resolver, dialer, log) = setup("");
        dialer.connect("example.test", "80", "PF_UNSPEC");
        drive(&reactor, || !log.lock().is_empty());
        assert_eq!(
            resolver.queries(),
            vec![
                (RecordType::A, "example.test".to_string()),
                (RecordType::Aaaa, "example.test".to_string()),
            ]
        );
        assert_eq!(*log.lock(), vec!["error:connect_error".to_string()]);
        assert_eq!(dialer.phase(), Phase::Failed);
        assert_eq!(dialer.attempts(), 0);
    }

    #[test]
    fn prefer_ipv6_queries_aaaa_first() {
        let (reactor, resolver, dialer, log) = setup("");
        dialer.connect("example.test", "80", "PF_UNSPEC6");
        drive(&reactor, || !log.lock().is_empty());
        assert_eq!(
            resolver.queries(),
            vec![
                (RecordType::Aaaa, "example.test".to_string()),
                (RecordType::A, "example.test".to_string()),
            ]
        );
    }

    #[test]
    fn single_family_has_no_fallback() {
        let (reactor, resolver, dialer, log) = setup("");
        dialer.connect("example.test", "80", "PF_INET6");
        drive(&reactor, || !log.lock().is_empty());
        assert_eq!(
            resolver.queries(),
            vec![(RecordType::Aaaa, "example.test".to_string())]
        );
        assert_eq!(*log.lock(), vec!["error:connect_error".to_string()]);
    }

    #[test]
    fn invalid_family_is_reported_without_resolving() {
        let (reactor, resolver, dialer, log) = setup("");
        dialer.connect("example.test", "80", "PF_APPLETALK");
        drive(&reactor, || !log.lock().is_empty());
        assert!(resolver.queries().is_empty());
        assert_eq!(
            *log.lock(),
            vec!["error:invalid_address_family".to_string()]
        );
    }

    #[test]
    fn literal_address_skips_resolution() {
        let (reactor, resolver, dialer, log) = setup("");
        // Port zero never accepts connections.
        dialer.connect("127.0.0.1", "0", "PF_APPLETALK");
        drive(&reactor, || !log.lock().is_empty());
        assert!(resolver.queries().is_empty());
        assert_eq!(dialer.attempts(), 1);
        assert_eq!(*log.lock(), vec!["error:connect_error".to_string()]);
    }

    #[test]
    fn dispatch_failure_is_reported() {
        let (reactor, resolver, dialer, log) = setup("");
        resolver.set_refuse(true);
        dialer.connect("example.test", "80", "PF_INET");
        drive(&reactor, || !log.lock().is_empty());
        assert_eq!(*log.lock(), vec!["error:dns_lookup_error".to_string()]);
    }

    #[test]
    fn bad_port_exhausts_candidates() {
        let (reactor, _resolver, dialer, log) =
            setup("192.0.2.1 example.test\n");
        dialer.connect("example.test", "http", "PF_INET");
        drive(&reactor, || !log.lock().is_empty());
        assert_eq!(dialer.attempts(), 0);
        assert_eq!(*log.lock(), vec!["error:connect_error".to_string()]);
    }

    #[test]
    fn close_during_resolution_cancels_query() {
        let (reactor, resolver, dialer, log) = setup("127.0.0.1 example.test\n");
        dialer.connect("example.test", "80", "PF_INET");
        // First iteration starts the query, whose answer is now queued.
        reactor.run_once();
        assert_eq!(resolver.queries().len(), 1);
        assert_eq!(dialer.phase(), Phase::Resolving);
        dialer.close();
        dialer.close();
        reactor.call_later(Duration::from_millis(20), || {});
        reactor.run_once();
        assert_eq!(dialer.phase(), Phase::Closed);
        assert_eq!(dialer.attempts(), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn close_before_start_never_connects() {
        let (reactor, resolver, dialer, log) = setup("127.0.0.1 example.test\n");
        dialer.connect("example.test", "80", "PF_INET");
        dialer.close();
        reactor.call_later(Duration::from_millis(20), || {});
        reactor.run_once();
        assert!(resolver.queries().is_empty());
        assert_eq!(dialer.phase(), Phase::Closed);
        assert!(dialer.target().is_none());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn fallback_dispatch_failure_keeps_candidates() {
        let (reactor, resolver, dialer, log) = setup("127.0.0.1 example.test\n");
        // Port zero never accepts connections.
        dialer.connect("example.test", "0", "PF_UNSPEC");
        // The first iteration issues the A query.
        reactor.run_once();
        assert_eq!(dialer.phase(), Phase::Resolving);
        resolver.set_refuse(true);
        drive(&reactor, || !log.lock().is_empty());
        assert_eq!(
            resolver.queries(),
            vec![(RecordType::A, "example.test".to_string())]
        );
        assert_eq!(dialer.attempts(), 1);
        assert_eq!(*log.lock(), vec!["error:connect_error".to_string()]);
    }

    #[test]
    fn desync_is_fatal() {
        let (reactor, _resolver, dialer, log) = setup("");
        {
            let mut state = dialer.inner.state.lock();
            state.phase = Phase::Racing;
            state.target = Some(Target::new("x.test", "80", "PF_INET"));
            state.candidates.push_address_only("127.0.0.1".parse().unwrap());
            let note = dialer.inner.connect_next(&mut state);
            drop(state);
            dialer.inner.deliver(note);
        }
        assert_eq!(*log.lock(), vec!["error:address_list_desync".to_string()]);
        assert_eq!(dialer.phase(), Phase::Failed);
        drop(reactor);
    }

    #[test]
    fn write_requires_connection() {
        let (_reactor, _resolver, dialer, _log) = setup("");
        assert!(matches!(dialer.write("hello"), Err(Error::NotConnected)));
    }

    #[test]
    fn config_limits() {
        let mut config = Config::new();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        config.set_connect_timeout(Duration::ZERO);
        assert_eq!(config.connect_timeout(), Duration::from_millis(1));
        config.set_read_buffer_size(1);
        assert_eq!(config.read_buffer_size(), 512);
    }
}
