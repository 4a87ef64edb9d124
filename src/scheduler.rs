//! Running tests on a background worker.
//!
//! A [`Scheduler`] accepts tests via [`submit()`][Scheduler::submit] and
//! runs them on a single worker thread that drives the shared reactor for
//! as long as there is anything to do. The worker is started lazily by the
//! first submission, exits on its own once no test is ready or active any
//! more, and is started again by the next submission. It is never joined.
//!
//! Each test is started via [`NetTest::begin`]. Once it reports back, the
//! scheduler calls [`NetTest::end`] and, after that has reported back too,
//! removes the test and invokes the completion callback given on
//! submission. A test can only be scheduled once at a time; submitting the
//! same test again before it has completed fails with
//! [`Error::DuplicateTest`].
//!
//! [`interrupt()`][Scheduler::interrupt] stops the worker early. All tests
//! that are ready or active at that moment are abandoned and their
//! completion callbacks are never invoked.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::nettest::TestRef;
use crate::reactor::SharedReactor;

//------------ Configuration Constants ----------------------------------------

/// The name of the worker thread.
const WORKER_NAME: &str = "netprobe-worker";

//------------ Callbacks ------------------------------------------------------

/// The completion callback for a submitted test.
pub type OnDone = Box<dyn FnOnce(TestRef) + Send>;

/// The hook invoked when the worker exits.
type OnEmpty = Arc<dyn Fn() + Send + Sync>;

//------------ WorkerState ----------------------------------------------------

/// Whether a worker thread is alive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum WorkerState {
    /// No worker is running. The next submission starts one.
    Stopped,

    /// A worker is running and will pick up new submissions.
    Running,
}

//------------ Scheduler ------------------------------------------------------

/// Runs tests on a lazily started background worker.
///
/// Schedulers are cheap to clone. All clones share the same state.
#[derive(Clone)]
pub struct Scheduler {
    /// The state shared with the worker.
    shared: Arc<Shared>,
}

/// The state shared between submitters and the worker.
struct Shared {
    /// The reactor driven by the worker.
    reactor: SharedReactor,

    /// Everything that changes.
    state: Mutex<State>,
}

/// The mutable part of the scheduler.
struct State {
    /// Tests submitted but not yet started.
    ready: HashMap<TestRef, OnDone>,

    /// Tests started but not yet completed.
    active: HashMap<TestRef, OnDone>,

    /// Set whenever `ready` or `active` change.
    changed: bool,

    /// Set while the scheduler is interrupted.
    interrupted: bool,

    /// Whether a worker is alive.
    worker: WorkerState,

    /// Called once per worker exit.
    on_empty: Option<OnEmpty>,

    /// Incremented whenever active tests are abandoned.
    ///
    /// Completions of a test started in an earlier epoch are ignored.
    epoch: u64,

    /// The number of workers started so far.
    worker_starts: usize,
}

impl Scheduler {
    /// Creates a new scheduler driving the given reactor.
    pub fn new(reactor: SharedReactor) -> Self {
        Scheduler {
            shared: Arc::new(Shared {
                reactor,
                state: Mutex::new(State {
                    ready: HashMap::new(),
                    active: HashMap::new(),
                    changed: false,
                    interrupted: false,
                    worker: WorkerState::Stopped,
                    on_empty: None,
                    epoch: 0,
                    worker_starts: 0,
                }),
            }),
        }
    }

    /// Returns the reactor driven by the scheduler.
    pub fn reactor(&self) -> &SharedReactor {
        &self.shared.reactor
    }

    /// Submits a test for execution.
    ///
    /// Once the test has completed, `on_done` is called with it on the
    /// worker thread. Fails if the same test is already ready or active or
    /// if the worker thread cannot be started. In both cases, nothing is
    /// scheduled.
    ///
    /// While the scheduler is interrupted, the test is queued but no
    /// worker is started.
    pub fn submit(
        &self,
        test: impl Into<TestRef>,
        on_done: impl FnOnce(TestRef) + Send + 'static,
    ) -> Result<(), Error> {
        let test = test.into();
        let mut state = self.shared.state.lock();
        if state.ready.contains_key(&test) || state.active.contains_key(&test)
        {
            warn!("scheduler: test already scheduled");
            return Err(Error::DuplicateTest);
        }
        state.ready.insert(test.clone(), Box::new(on_done));
        state.changed = true;

        if state.interrupted {
            debug!("scheduler: interrupted, not starting a worker");
            return Ok(());
        }
        match state.worker {
            WorkerState::Running => {
                // The worker may be blocked in the reactor.
                self.shared.reactor.wakeup();
            }
            WorkerState::Stopped => {
                if let Err(err) = self.spawn_worker() {
                    warn!("scheduler: cannot start worker: {}", err);
                    state.ready.remove(&test);
                    return Err(Error::WorkerSpawn(Arc::new(err)));
                }
                state.worker = WorkerState::Running;
                state.worker_starts += 1;
            }
        }
        Ok(())
    }

    /// Stops the worker and abandons all tests.
    ///
    /// Tests that are ready or active are dropped without their completion
    /// callbacks ever being invoked. The worker exits at its next
    /// opportunity. This is idempotent.
    pub fn interrupt(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.interrupted {
                debug!(
                    "scheduler: interrupting, abandoning {} ready and {} \
                     active tests",
                    state.ready.len(),
                    state.active.len()
                );
            }
            state.interrupted = true;
            state.ready.clear();
            state.active.clear();
            state.epoch += 1;
            state.changed = true;
        }
        self.shared.reactor.wakeup();
    }

    /// Ends an interruption.
    ///
    /// Tests submitted while interrupted are discarded. The next
    /// submission starts a new worker.
    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if !state.ready.is_empty() {
            debug!(
                "scheduler: discarding {} tests queued while interrupted",
                state.ready.len()
            );
        }
        state.ready.clear();
        state.interrupted = false;
    }

    /// Returns whether no worker is running.
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().worker == WorkerState::Stopped
    }

    /// Sets the hook called whenever the worker exits.
    ///
    /// The worker exits when it runs out of tests or when interrupted.
    /// Replaces any previously set hook. The hook is called on the worker
    /// thread.
    pub fn on_empty(&self, op: impl Fn() + Send + Sync + 'static) {
        self.shared.state.lock().on_empty = Some(Arc::new(op));
    }

    /// Returns how many times a worker has been started.
    pub fn worker_starts(&self) -> usize {
        self.shared.state.lock().worker_starts
    }

    /// Starts a new, detached worker thread.
    fn spawn_worker(&self) -> Result<(), io::Error> {
        let shared = self.shared.clone();
        thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || shared.run_worker())
            .map(|_| ())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("ready", &state.ready.len())
            .field("active", &state.active.len())
            .field("interrupted", &state.interrupted)
            .field("worker", &state.worker)
            .finish()
    }
}

//------------ Worker ---------------------------------------------------------

impl Shared {
    /// The worker's main loop.
    fn run_worker(self: Arc<Self>) {
        debug!("scheduler: worker started");
        loop {
            let (started, epoch) = {
                let mut state = self.state.lock();
                // An interrupt followed by a resume before we got here
                // leaves empty maps and ends up in the second branch.
                // Either way the hook runs once.
                let exit = if state.interrupted {
                    Some("interrupted")
                } else if state.ready.is_empty() && state.active.is_empty() {
                    Some("no more tests")
                } else {
                    None
                };
                if let Some(reason) = exit {
                    state.worker = WorkerState::Stopped;
                    let on_empty = state.on_empty.clone();
                    drop(state);
                    debug!("scheduler: worker done, {}", reason);
                    if let Some(op) = on_empty {
                        op()
                    }
                    return;
                }
                state.changed = false;
                let ready: Vec<_> = state.ready.drain().collect();
                let mut started = Vec::with_capacity(ready.len());
                for (test, on_done) in ready {
                    started.push(test.clone());
                    if state.active.insert(test, on_done).is_some() {
                        panic!("scheduler: test both ready and active");
                    }
                }
                (started, state.epoch)
            };

            for test in started {
                trace!("scheduler: beginning test");
                self.begin(test, epoch);
            }

            loop {
                {
                    let state = self.state.lock();
                    if state.changed || state.interrupted {
                        break;
                    }
                }
                self.reactor.run_once();
            }
        }
    }

    /// Begins a test, arranging for it to be ended and completed.
    fn begin(self: &Arc<Self>, test: TestRef, epoch: u64) {
        let shared = self.clone();
        let started = test.clone();
        test.begin(Box::new(move || {
            let finished = started.clone();
            started.end(Box::new(move || shared.complete(finished, epoch)));
        }));
    }

    /// Completes a test that has ended.
    fn complete(&self, test: TestRef, epoch: u64) {
        let on_done = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                trace!("scheduler: ignoring completion of abandoned test");
                return;
            }
            let on_done = match state.active.remove(&test) {
                Some(on_done) => on_done,
                None => panic!("scheduler: completed test is not active"),
            };
            state.changed = true;
            on_done
        };
        self.reactor.wakeup();
        trace!("scheduler: test completed");
        on_done(test)
    }
}

//============ Tests =========================================================
