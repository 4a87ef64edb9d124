//! A resolver sending DNS queries to the system's name servers.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::{Message, Name};
use domain::rdata::{Aaaa, A};
use tokio::runtime::Handle;
use tracing::debug;

use super::{Query, ResolveCallback, Resolver, Status};
use crate::error::Error;
use crate::net::addr::RecordType;
use crate::reactor::{Poster, Reactor};

//------------ StubResolver --------------------------------------------------

/// A DNS stub resolver.
///
/// This wraps the stub resolver of the `domain` crate, configured from the
/// system's resolver configuration. Lookups run as tasks on the reactor,
/// so they only make progress while the reactor is being driven.
#[derive(Clone)]
pub struct StubResolver {
    /// The runtime the lookup tasks are spawned on.
    handle: Handle,

    /// Where answers are posted.
    poster: Poster,

    /// The actual resolver.
    resolver: Arc<domain::resolv::StubResolver>,
}

impl StubResolver {
    /// Creates a new resolver using the system's configuration.
    pub fn new(reactor: &Reactor) -> Self {
        StubResolver {
            handle: reactor.handle().clone(),
            poster: reactor.poster(),
            resolver: Arc::new(domain::resolv::StubResolver::new()),
        }
    }
}

impl Resolver for StubResolver {
    fn resolve(
        &self,
        rtype: RecordType,
        name: &str,
        on_result: ResolveCallback,
    ) -> Result<Query, Error> {
        let qname = Name::<Vec<u8>>::from_str(name)
            .map_err(|_| Error::ResolutionDispatchFailure(name.into()))?;
        let qtype = match rtype {
            RecordType::A => Rtype::A,
            RecordType::Aaaa => Rtype::AAAA,
        };
        let resolver = self.resolver.clone();
        let poster = self.poster.clone();
        let (query, completion) = Query::new(on_result);
        let qname_text = name.to_string();
        let task = self.handle.spawn(async move {
            let (status, addrs) =
                match resolver.query((qname, qtype, Class::IN)).await {
                    Ok(answer) => evaluate(&answer, rtype),
                    Err(err) => {
                        debug!(
                            "stub: {} query for {} failed: {}",
                            rtype, qname_text, err
                        );
                        (Status::from_io(&err), Vec::new())
                    }
                };
            debug!("stub: {} {} -> {} ({:?})", rtype, qname_text, status, addrs);
            poster.call_soon(move || completion.complete(status, addrs));
        });
        Ok(query.with_task(task.abort_handle()))
    }
}

/// Turns a name server's answer into a status and addresses.
///
/// Only records of the queried type are taken, so an alias chain ending
/// in addresses still counts as an answer.
fn evaluate(
    answer: &Message<Bytes>,
    rtype: RecordType,
) -> (Status, Vec<IpAddr>) {
    let rcode = answer.header().rcode();
    if rcode == Rcode::NXDOMAIN {
        return (Status::NotExist, Vec::new());
    }
    if rcode != Rcode::NOERROR {
        debug!("stub: name server answered {:?}", rcode);
        return (Status::ServerFailed, Vec::new());
    }
    let section = match answer.answer() {
        Ok(section) => section,
        Err(_) => return (Status::Failed, Vec::new()),
    };
    let addrs: Vec<IpAddr> = match rtype {
        RecordType::A => section
            .limit_to::<A>()
            .filter_map(Result::ok)
            .map(|record| IpAddr::V4(record.data().addr()))
            .collect(),
        RecordType::Aaaa => section
            .limit_to::<Aaaa>()
            .filter_map(Result::ok)
            .map(|record| IpAddr::V6(record.data().addr()))
            .collect(),
    };
    if addrs.is_empty() {
        (Status::NoData, addrs)
    } else {
        (Status::Ok, addrs)
    }
}

impl fmt::Debug for StubResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubResolver").finish()
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    use domain::base::{MessageBuilder, Record, Ttl};

    fn answer(rcode: Rcode, addrs: &[&str]) -> Message<Bytes> {
        let owner = Name::<Bytes>::from_str("example.test.").unwrap();
        let mut msg = MessageBuilder::new_bytes().question();
        msg.header_mut().set_qr(true);
        msg.header_mut().set_rcode(rcode);
        msg.push((owner.clone(), Rtype::A)).unwrap();
        let mut msg = msg.answer();
        for addr in addrs {
            msg.push(Record::new(
                owner.clone(),
                Class::IN,
                Ttl::from_secs(3600),
                A::new(addr.parse().unwrap()),
            ))
            .unwrap();
        }
        msg.into_message()
    }

    #[test]
    fn answer_status() {
        let (status, addrs) =
            evaluate(&answer(Rcode::NOERROR, &["192.0.2.1"]), RecordType::A);
        assert_eq!(status, Status::Ok);
        assert_eq!(addrs, vec!["192.0.2.1".parse::<IpAddr>().unwrap()]);

        let (status, addrs) =
            evaluate(&answer(Rcode::NOERROR, &["192.0.2.1"]), RecordType::Aaaa);
        assert_eq!(status, Status::NoData);
        assert!(addrs.is_empty());

        let (status, _) = evaluate(&answer(Rcode::NXDOMAIN, &[]), RecordType::A);
        assert_eq!(status, Status::NotExist);

        let (status, _) = evaluate(&answer(Rcode::SERVFAIL, &[]), RecordType::A);
        assert_eq!(status, Status::ServerFailed);
        assert!(status.is_answer());
    }

    #[test]
    fn bad_name_fails_dispatch() {
        let reactor = Reactor::new().unwrap();
        let resolver = StubResolver::new(&reactor);
        let long = "a".repeat(300);
        let res = resolver.resolve(RecordType::A, &long, Box::new(|_, _| {}));
        assert!(matches!(res, Err(Error::ResolutionDispatchFailure(_))));
    }
}
