//! Running TCP connect tests through the scheduler.

use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use netprobe::config::{Settings, TaskName};
use netprobe::net::resolver::{Hosts, HostsResolver, Resolver};
use netprobe::nettest::TcpConnect;
use netprobe::reactor::Reactor;
use netprobe::scheduler::Scheduler;

fn settings() -> Settings {
    let settings = Settings::loads(
        r#"{"name": "TcpConnect", "log_level": "DEBUG", "options": {"max_runtime": 5}}"#,
    )
    .unwrap();
    netprobe::logging::init_logging_with_level(settings.log_level);
    settings
}

fn wait_idle(scheduler: &Scheduler) {
    for _ in 0..500 {
        if scheduler.is_idle() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("scheduler did not become idle");
}

#[test]
fn records_success_and_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let reactor = Arc::new(Reactor::new().unwrap());
    let resolver: Arc<dyn Resolver> = Arc::new(HostsResolver::new(
        &reactor,
        "127.0.0.1 open.test closed.test\n".parse::<Hosts>().unwrap(),
    ));
    let scheduler = Scheduler::new(reactor.clone());
    let (tx, rx) = mpsc::channel();

    let good = Arc::new(TcpConnect::new(
        reactor.clone(),
        resolver.clone(),
        format!("open.test:{}", open),
        settings(),
    ));
    let bad = Arc::new(TcpConnect::new(
        reactor.clone(),
        resolver.clone(),
        format!("closed.test:{}", closed),
        settings(),
    ));
    for test in [good.clone(), bad.clone()] {
        let tx = tx.clone();
        scheduler
            .submit(test.clone(), move |_| tx.send(test.entry()).unwrap())
            .unwrap();
    }
    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    wait_idle(&scheduler);

    let mut entries = [first, second];
    entries.sort_by_key(|entry| entry.get_str("input").map(String::from));
    assert_eq!(entries[0].get_str("connection"), Some("connect_error"));
    assert_eq!(entries[1].get_str("connection"), Some("success"));
    assert_eq!(
        entries[1].get("attempts"),
        Some(&serde_json::Value::from(1))
    );
    assert_eq!(good.entry(), entries[1]);
    assert_eq!(bad.entry(), entries[0]);
    assert_eq!(scheduler.worker_starts(), 1);
    drop(listener);
}

#[test]
fn default_port_from_options() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut settings = Settings::new(TaskName::TcpConnect);
    settings.options.port = Some(port);

    let reactor = Arc::new(Reactor::new().unwrap());
    let resolver: Arc<dyn Resolver> =
        Arc::new(HostsResolver::new(&reactor, Hosts::new()));
    let scheduler = Scheduler::new(reactor.clone());
    let test = Arc::new(TcpConnect::new(
        reactor.clone(),
        resolver,
        "127.0.0.1",
        settings,
    ));
    let (tx, rx) = mpsc::channel();
    let done = test.clone();
    scheduler
        .submit(test.clone(), move |_| tx.send(done.entry()).unwrap())
        .unwrap();
    let entry = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(entry.get_str("connection"), Some("success"));
    assert_eq!(entry.get_str("input"), Some("127.0.0.1"));
    wait_idle(&scheduler);

    // The same test can run again once it has completed.
    let (tx, rx) = mpsc::channel();
    scheduler.submit(test, move |_| tx.send(()).unwrap()).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    wait_idle(&scheduler);
    assert_eq!(scheduler.worker_starts(), 2);
}
