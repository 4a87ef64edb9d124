//! A network measurement client.
//!
//! This crate provides the plumbing for running network tests: a
//! scheduler executing tests on a background worker and a dialer for
//! establishing TCP connections to hosts given by name.
//!
//! # Modules
//!
//! * [scheduler] runs tests on a lazily started worker thread that drives
//!   the shared [reactor] for as long as any test is pending,
//! * [net] contains the [dialer][net::dialer] with its dual-stack
//!   resolution order and candidate racing, the
//!   [resolvers][net::resolver] it can use, and a simple
//!   [connectivity check][net::connectivity],
//! * [nettest] defines the interface tests implement and provides a TCP
//!   connect test, and
//! * [config] holds the JSON settings of a measurement task.
//!
//! All callbacks, be it those of a dialer or those of a test, are run on
//! the thread driving the reactor. When tests are run through a
//! [`Scheduler`][scheduler::Scheduler], that is the scheduler's worker.
//!
//! # Reference of Feature Flags
//!
#![cfg_attr(feature = "resolv", doc = "* `resolv`: Enables the [StubResolver][net::resolver::StubResolver]")]
#![cfg_attr(not(feature = "resolv"), doc = "* `resolv`: Enables the `StubResolver`")]
//!   which sends DNS queries to the system's name servers using the
//!   [domain](https://github.com/NLnetLabs/domain) crate. Enabled by
//!   default.

#![allow(renamed_and_removed_lints)]
#![allow(clippy::unknown_clippy_lints)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod error;
pub mod logging;
pub mod net;
pub mod nettest;
pub mod reactor;
pub mod scheduler;

mod utils;
