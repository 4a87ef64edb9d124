//! The event loop.
//!
//! A [`Reactor`] is a single-threaded cooperative event loop. Socket I/O,
//! name resolution and timers progress as tasks on a tokio current-thread
//! runtime, but none of them ever invoke user callbacks directly. Instead,
//! they post an operation through a [`Poster`] and the operation is run by
//! whichever thread currently drives the reactor through
//! [`run_once()`][Reactor::run_once] or [`run()`][Reactor::run].
//!
//! This gives the same guarantee a classic callback reactor gives: all
//! callbacks run on the driving thread, one after the other, and never
//! while a task is being polled.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::trace;

//------------ Op ------------------------------------------------------------

/// An operation to be run by the thread driving the reactor.
pub type Op = Box<dyn FnOnce() + Send + 'static>;

//------------ Reactor -------------------------------------------------------

/// A single-threaded event loop.
pub struct Reactor {
    /// The runtime driving I/O and timer tasks.
    runtime: Runtime,

    /// Sending side of the operation queue.
    poster: Poster,

    /// Receiving side of the operation queue.
    ///
    /// Locked for the duration of one iteration which serializes iterations
    /// should more than one thread try to drive the reactor.
    queue: Mutex<UnboundedReceiver<Op>>,

    /// Wakes up an iteration blocked waiting for operations.
    wakeup: Notify,

    /// Set by `break_loop` to end `run`.
    stopped: AtomicBool,
}

impl Reactor {
    /// Creates a new reactor.
    pub fn new() -> Result<Self, io::Error> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Reactor {
            runtime,
            poster: Poster { tx },
            queue: Mutex::new(rx),
            wakeup: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Returns a handle for posting operations from anywhere.
    pub fn poster(&self) -> Poster {
        self.poster.clone()
    }

    /// Returns a handle to the underlying runtime.
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Arranges for `op` to be run during the next iteration.
    pub fn call_soon<F>(&self, op: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.poster.call_soon(op)
    }

    /// Arranges for `op` to be run once `delay` has passed.
    ///
    /// The returned handle can be used to cancel the call.
    pub fn call_later<F>(&self, delay: Duration, op: F) -> AbortHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let poster = self.poster();
        self.runtime
            .spawn(async move {
                tokio::time::sleep(delay).await;
                poster.call_soon(op);
            })
            .abort_handle()
    }

    /// Spawns an I/O task onto the reactor.
    ///
    /// The task only makes progress while some thread drives the reactor.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(fut)
    }

    /// Runs a single iteration.
    ///
    /// Blocks until at least one operation is ready or the reactor is woken
    /// up, then runs all operations that were ready at that moment.
    /// Operations posted by those operations are left for the next
    /// iteration.
    pub fn run_once(&self) {
        let ops = {
            let mut queue = self.queue.lock();
            self.runtime.block_on(async {
                tokio::select! {
                    op = queue.recv() => {
                        let mut ops: Vec<Op> = op.into_iter().collect();
                        while let Ok(op) = queue.try_recv() {
                            ops.push(op)
                        }
                        ops
                    }
                    _ = self.wakeup.notified() => Vec::new(),
                }
            })
        };
        if ops.is_empty() {
            return;
        }
        trace!("reactor: running {} operations", ops.len());
        let _enter = self.runtime.enter();
        for op in ops {
            op()
        }
    }

    /// Runs iterations until [`break_loop()`][Self::break_loop] is called.
    pub fn run(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        while !self.stopped.swap(false, Ordering::SeqCst) {
            self.run_once()
        }
        trace!("reactor: loop broken");
    }

    /// Unblocks an in-progress iteration and ends [`run()`][Self::run].
    ///
    /// This is idempotent and may be called from any thread.
    pub fn break_loop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    /// Unblocks an in-progress iteration without ending `run()`.
    ///
    /// If no iteration is in progress, the next one returns immediately.
    pub fn wakeup(&self) {
        self.wakeup.notify_one();
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

//------------ Poster --------------------------------------------------------

/// A cheap handle for posting operations onto a reactor.
///
/// Posters do not keep the reactor alive. Operations posted after the
/// reactor is gone are dropped.
#[derive(Clone, Debug)]
pub struct Poster {
    /// The operation queue.
    tx: UnboundedSender<Op>,
}

impl Poster {
    /// Arranges for `op` to be run during the next reactor iteration.
    pub fn call_soon<F>(&self, op: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(op)).is_err() {
            trace!("reactor: gone, dropping operation");
        }
    }
}

//------------ SharedReactor -------------------------------------------------

/// A reactor shared between the scheduler, dialers and tests.
pub type SharedReactor = Arc<Reactor>;

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn call_soon_runs_on_next_iteration() {
        let reactor = Reactor::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            reactor.call_soon(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        reactor.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn nested_posts_wait_for_next_iteration() {
        let reactor = Arc::new(Reactor::new().unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let poster = reactor.poster();
        let inner = count.clone();
        reactor.call_soon(move || {
            poster.call_soon(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            });
        });
        reactor.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        reactor.run_once();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn call_later_waits_for_delay() {
        let reactor = Reactor::new().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let start = Instant::now();
        let flag = fired.clone();
        reactor.call_later(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        reactor.run_once();
        assert!(fired.load(Ordering::SeqCst));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn break_loop_unblocks_from_other_thread() {
        let reactor = Arc::new(Reactor::new().unwrap());
        let remote = reactor.clone();
        let breaker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.break_loop();
        });
        reactor.run();
        breaker.join().unwrap();
    }

    #[test]
    fn break_loop_from_operation_ends_run() {
        let reactor = Arc::new(Reactor::new().unwrap());
        let inner = reactor.clone();
        reactor.call_later(Duration::from_millis(10), move || {
            inner.break_loop();
        });
        reactor.run();
    }
}
