//! Checking whether the network is usable at all.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::net::addr::RecordType;
use crate::net::resolver::{Resolver, Status};
use crate::reactor::Reactor;

/// How long to wait for an answer before declaring the network down.
const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Checks whether the network is up by resolving `name`.
///
/// Issues a single A query and drives the reactor until the outcome is
/// known. Any answer from a name server, even a negative one, means the
/// network is up. Must not be called while another thread is driving the
/// reactor.
pub fn check_connectivity(
    reactor: &Reactor,
    resolver: &dyn Resolver,
    name: &str,
) -> bool {
    let outcome: Arc<Mutex<Option<Status>>> = Arc::new(Mutex::new(None));

    let answer = outcome.clone();
    let query = match resolver.resolve(
        RecordType::A,
        name,
        Box::new(move |status, _| {
            answer.lock().get_or_insert(status);
        }),
    ) {
        Ok(query) => query,
        Err(err) => {
            warn!("connectivity: cannot resolve {}: {}", name, err);
            return false;
        }
    };

    let expired = outcome.clone();
    let timer = reactor.call_later(CHECK_TIMEOUT, move || {
        expired.lock().get_or_insert(Status::Timeout);
    });

    let status = loop {
        if let Some(status) = *outcome.lock() {
            break status;
        }
        reactor.run_once();
    };
    timer.abort();
    query.cancel();

    if status.is_answer() {
        debug!("connectivity: network is up ({} for {})", status, name);
        true
    } else {
        warn!("connectivity: network is down ({} for {})", status, name);
        false
    }
}

//============ Tests =========================================================
