//! Static host table.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{Query, ResolveCallback, Resolver, Status};
use crate::error::Error;
use crate::net::addr::{Family, RecordType};
use crate::reactor::{Poster, Reactor};

//------------ Hosts --------------------------------------------------------

/// A table mapping host names to addresses.
///
/// Names are compared case-insensitively and without a trailing dot. A
/// name can map to any number of addresses of either family; their order
/// is kept.
#[derive(Clone, Debug, Default)]
pub struct Hosts {
    /// The addresses for each name.
    forward: HashMap<String, Vec<IpAddr>>,
}

/// # Creation and Manipulation
///
impl Hosts {
    /// Creates a new, empty host table.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates the host table for this system.
    ///
    /// This currently only works for Unix-y systems. A missing or
    /// unreadable file results in an empty table.
    pub fn from_system() -> Self {
        let mut res = Hosts::new();
        let _ = res.parse_file("/etc/hosts");
        res
    }

    /// Adds a host to address mapping.
    pub fn add(&mut self, name: &str, addr: IpAddr) {
        let addrs = self.forward.entry(normalize(name)).or_default();
        if !addrs.contains(&addr) {
            addrs.push(addr)
        }
    }
}

/// # Lookups
///
impl Hosts {
    /// Returns whether the table knows about `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.forward.contains_key(&normalize(name))
    }

    /// Looks up the addresses of `name` belonging to `family`.
    pub fn lookup(&self, name: &str, family: Family) -> Vec<IpAddr> {
        self.forward
            .get(&normalize(name))
            .map(|addrs| {
                addrs
                    .iter()
                    .filter(|addr| Family::of(addr) == family)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// # Parsing Hosts Files
///
impl Hosts {
    /// Adds the hosts listed in a file.
    pub fn parse_file<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let mut file = fs::File::open(path)?;
        self.parse(&mut file)
    }

    /// Reads hosts from a reader and adds them.
    ///
    /// The format is that of the /etc/hosts file. Malformed lines are
    /// skipped.
    pub fn parse<R: io::Read>(&mut self, reader: &mut R) -> io::Result<()> {
        for line in io::BufReader::new(reader).lines() {
            let line = line?;
            if self.parse_line(&line).is_none() {
                trace!("hosts: skipping line '{}'", line);
            }
        }
        Ok(())
    }

    /// Parses a single line.
    ///
    /// Returns `None` if the line was malformed.
    fn parse_line(&mut self, line: &str) -> Option<()> {
        let line = match line.find('#') {
            Some(pos) => line.split_at(pos).0,
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            return Some(());
        }
        let mut words = line.split_whitespace();
        let addr = IpAddr::from_str(words.next()?).ok()?;
        let mut names = words.peekable();
        names.peek()?;
        for name in names {
            self.add(name, addr);
        }
        Some(())
    }
}

impl FromStr for Hosts {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut res = Hosts::new();
        res.parse(&mut s.as_bytes())?;
        Ok(res)
    }
}

/// Brings a host name into the form used as key.
fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

//------------ HostsResolver -------------------------------------------------

/// A resolver answering from a static host table.
///
/// Answers are posted to the reactor, so they arrive during the next
/// iteration just like those of a real resolver. Every query is recorded
/// and can be inspected via [`queries()`][Self::queries].
#[derive(Debug)]
pub struct HostsResolver {
    /// Where answers are posted.
    poster: Poster,

    /// The host table.
    hosts: RwLock<Hosts>,

    /// All queries received so far.
    queries: Mutex<Vec<(RecordType, String)>>,

    /// Whether to refuse starting queries.
    refuse: AtomicBool,
}

impl HostsResolver {
    /// Creates a resolver answering from `hosts`.
    pub fn new(reactor: &Reactor, hosts: Hosts) -> Self {
        HostsResolver {
            poster: reactor.poster(),
            hosts: RwLock::new(hosts),
            queries: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        }
    }

    /// Creates a resolver answering from the system's host table.
    pub fn from_system(reactor: &Reactor) -> Self {
        Self::new(reactor, Hosts::from_system())
    }

    /// Adds a host to address mapping.
    pub fn add(&self, name: &str, addr: IpAddr) {
        self.hosts.write().add(name, addr)
    }

    /// Makes all following queries fail to start.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst)
    }

    /// Returns the queries received so far in order.
    pub fn queries(&self) -> Vec<(RecordType, String)> {
        self.queries.lock().clone()
    }
}

impl Resolver for HostsResolver {
    fn resolve(
        &self,
        rtype: RecordType,
        name: &str,
        on_result: ResolveCallback,
    ) -> Result<Query, Error> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::ResolutionDispatchFailure(name.into()));
        }
        self.queries.lock().push((rtype, name.into()));
        let (status, addrs) = {
            let hosts = self.hosts.read();
            let addrs = hosts.lookup(name, rtype.family());
            if !addrs.is_empty() {
                (Status::Ok, addrs)
            } else if hosts.contains(name) {
                (Status::NoData, addrs)
            } else {
                (Status::NotExist, addrs)
            }
        };
        debug!("hosts: {} {} -> {} ({:?})", rtype, name, status, addrs);
        let (query, completion) = Query::new(on_result);
        self.poster
            .call_soon(move || completion.complete(status, addrs));
        Ok(query)
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    const HOSTS: &str = "\
        # loopback\n\
        127.0.0.1   localhost loopback\n\
        ::1         localhost ip6-localhost\n\
        \n\
        192.0.2.10  Example.Test   # documentation\n\
        not-an-ip   broken\n\
        192.0.2.11\n\
        2001:db8::10 example.test.\n";

    #[test]
    fn parse_hosts() {
        let hosts: Hosts = HOSTS.parse().unwrap();
        assert_eq!(
            hosts.lookup("localhost", Family::Inet),
            vec!["127.0.0.1".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(
            hosts.lookup("localhost", Family::Inet6),
            vec!["::1".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(
            hosts.lookup("example.test", Family::Inet),
            vec!["192.0.2.10".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(
            hosts.lookup("EXAMPLE.TEST.", Family::Inet6),
            vec!["2001:db8::10".parse::<IpAddr>().unwrap()]
        );
        assert!(hosts.lookup("ip6-localhost", Family::Inet).is_empty());
        assert!(hosts.contains("ip6-localhost"));
        assert!(!hosts.contains("broken"));
    }

    #[test]
    fn resolver_answers_on_reactor() {
        let reactor = Reactor::new().unwrap();
        let resolver = HostsResolver::new(&reactor, HOSTS.parse().unwrap());
        let results = Arc::new(Mutex::new(Vec::new()));

        for (rtype, name) in [
            (RecordType::A, "loopback"),
            (RecordType::Aaaa, "loopback"),
            (RecordType::A, "nowhere.test"),
        ] {
            let results = results.clone();
            resolver
                .resolve(
                    rtype,
                    name,
                    Box::new(move |status, addrs| {
                        results.lock().push((status, addrs.len()))
                    }),
                )
                .unwrap();
        }
        assert!(results.lock().is_empty());
        reactor.run_once();
        assert_eq!(
            *results.lock(),
            vec![
                (Status::Ok, 1),
                (Status::NoData, 0),
                (Status::NotExist, 0)
            ]
        );
        assert_eq!(
            resolver.queries(),
            vec![
                (RecordType::A, "loopback".to_string()),
                (RecordType::Aaaa, "loopback".to_string()),
                (RecordType::A, "nowhere.test".to_string()),
            ]
        );
    }

    #[test]
    fn refused_dispatch() {
        let reactor = Reactor::new().unwrap();
        let resolver = HostsResolver::new(&reactor, Hosts::new());
        resolver.set_refuse(true);
        let res = resolver.resolve(RecordType::A, "x.test", Box::new(|_, _| {}));
        assert!(matches!(res, Err(Error::ResolutionDispatchFailure(_))));
        assert!(resolver.queries().is_empty());
    }
}
