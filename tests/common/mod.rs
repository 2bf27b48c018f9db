// Copyright 2020 Joyent, Inc.

//
// An in-memory replica set: which endpoints accept connections, what the
// sentinels answer, and a log of everything the pool did.
//

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use slog::{o, Drain, Logger};
use thiserror::Error;

use sentinel_pool::backend::Backend;
use sentinel_pool::command::{Command, Reply};
use sentinel_pool::connection::Connection;
use sentinel_pool::connection_pool::ConnectionPool;
use sentinel_pool::resolver::{Resolver, StaticResolver};
use sentinel_pool::sentinel::SentinelDiscovery;

pub const MASTER_NAME: &str = "mymaster";
pub const MASTER: &str = "10.0.1.1:6379";
pub const REJECTED_DB: u32 = 99;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Connect(String, bool),
    Command(String, Vec<String>),
    Close(String),
}

#[derive(Debug, Error)]
#[error("connection refused by {0}")]
pub struct MockError(String);

#[derive(Debug)]
pub struct MockCluster {
    up: Mutex<HashSet<String>>,
    dead: Mutex<HashSet<usize>>,
    master: Mutex<Reply>,
    slaves: Mutex<Reply>,
    events: Mutex<Vec<Event>>,
    next_id: AtomicUsize,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(MockCluster {
            up: Mutex::new(HashSet::new()),
            dead: Mutex::new(HashSet::new()),
            master: Mutex::new(Reply::Array(vec![
                Reply::Str("10.0.1.1".into()),
                Reply::Str("6379".into()),
            ])),
            slaves: Mutex::new(Reply::Array(Vec::new())),
            events: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        })
    }

    pub fn bring_up(&self, name: &str) {
        self.up.lock().unwrap().insert(name.to_string());
    }

    pub fn take_down(&self, name: &str) {
        self.up.lock().unwrap().remove(name);
    }

    pub fn kill(&self, id: usize) {
        self.dead.lock().unwrap().insert(id);
    }

    pub fn set_master_reply(&self, reply: Reply) {
        *self.master.lock().unwrap() = reply;
    }

    /// Each slave is an (ip, port, flags) triple.
    pub fn set_slaves(&self, slaves: &[(&str, &str, &str)]) {
        let records = slaves
            .iter()
            .map(|(ip, port, flags)| slave_record(ip, port, flags))
            .collect();
        *self.slaves.lock().unwrap() = Reply::Array(records);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Connect attempts against `name`, successful or not.
    pub fn connects_to(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| match e {
                Event::Connect(n, _) => n == name,
                _ => false,
            })
            .count()
    }

    /// The endpoints connect attempts were made against, in order.
    pub fn connect_order(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Connect(n, ok) => Some((n, ok)),
                _ => None,
            })
            .collect()
    }

    /// Commands whose tokens start with `prefix`.
    pub fn commands(&self, prefix: &[&str]) -> usize {
        self.events()
            .iter()
            .filter(|e| match e {
                Event::Command(_, tokens) => {
                    tokens.len() >= prefix.len()
                        && tokens.iter().zip(prefix.iter()).all(|(t, p)| t == p)
                }
                _ => false,
            })
            .count()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn answer(&self, command: &Command) -> Reply {
        let tokens: Vec<&str> =
            command.tokens().iter().map(String::as_str).collect();
        match tokens.as_slice() {
            ["SENTINEL", "slaves", name] if *name == MASTER_NAME => {
                self.slaves.lock().unwrap().clone()
            }
            ["SENTINEL", "get-master-addr-by-name", name]
                if *name == MASTER_NAME =>
            {
                self.master.lock().unwrap().clone()
            }
            ["SENTINEL", ..] => {
                Reply::Error("ERR No such master with that name".into())
            }
            ["SELECT", db] if *db == REJECTED_DB.to_string() => {
                Reply::Error("ERR DB index is out of range".into())
            }
            ["SELECT", _] => Reply::Status("OK".into()),
            ["PING"] => Reply::Status("PONG".into()),
            _ => Reply::Error("ERR unknown command".into()),
        }
    }
}

pub fn slave_record(ip: &str, port: &str, flags: &str) -> Reply {
    let name = format!("{}:{}", ip, port);
    let fields: [&str; 12] = [
        "name",
        &name,
        "ip",
        ip,
        "port",
        port,
        "runid",
        "0123456789abcdef",
        "flags",
        flags,
        "link-pending-commands",
        "0",
    ];
    Reply::Array(fields.iter().map(|f| Reply::Str(f.to_string())).collect())
}

#[derive(Debug)]
pub struct MockConnection {
    pub id: usize,
    pub backend: Backend,
    cluster: Arc<MockCluster>,
    pending: VecDeque<Command>,
}

impl MockConnection {
    pub fn new(b: &Backend, cluster: Arc<MockCluster>) -> Self {
        MockConnection {
            id: cluster.next_id.fetch_add(1, Ordering::SeqCst),
            backend: b.clone(),
            cluster,
            pending: VecDeque::new(),
        }
    }
}

impl Connection for MockConnection {
    type Error = MockError;

    fn connect(&mut self) -> Result<(), MockError> {
        let ok = self.cluster.up.lock().unwrap().contains(&self.backend.name);
        self.cluster
            .record(Event::Connect(self.backend.name.clone(), ok));
        if ok {
            Ok(())
        } else {
            Err(MockError(self.backend.name.clone()))
        }
    }

    fn is_valid(&mut self) -> bool {
        !self.cluster.dead.lock().unwrap().contains(&self.id)
    }

    fn append(&mut self, command: &Command) -> Result<(), MockError> {
        self.cluster.record(Event::Command(
            self.backend.name.clone(),
            command.tokens().to_vec(),
        ));
        self.pending.push_back(command.clone());
        Ok(())
    }

    fn get_reply(&mut self) -> Result<Reply, MockError> {
        match self.pending.pop_front() {
            Some(command) => Ok(self.cluster.answer(&command)),
            None => Err(MockError(self.backend.name.clone())),
        }
    }

    fn close(&mut self) -> Result<(), MockError> {
        self.cluster.record(Event::Close(self.backend.name.clone()));
        Ok(())
    }
}

pub struct FailingResolver;

impl Resolver for FailingResolver {
    fn get_addresses(
        &self,
        host: &str,
    ) -> Result<Vec<String>, sentinel_pool::error::Error> {
        Err(sentinel_pool::error::Error::ResolveFailure(host.to_string()))
    }
}

pub fn test_log() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    )
}

pub fn discovery<R: Resolver>(
    cluster: &Arc<MockCluster>,
    resolver: R,
    seed: u64,
    sleeps: Arc<AtomicUsize>,
) -> SentinelDiscovery<
    MockConnection,
    R,
    impl Fn(&Backend) -> MockConnection + Send + Sync + 'static,
> {
    let cluster = Arc::clone(cluster);
    SentinelDiscovery::new(
        "sentinels.local",
        MASTER_NAME,
        resolver,
        move |b: &Backend| MockConnection::new(b, Arc::clone(&cluster)),
        test_log(),
    )
    .with_master_retries(5, Duration::from_secs(5))
    .with_rng(StdRng::seed_from_u64(seed))
    .with_sleep(move |_| {
        sleeps.fetch_add(1, Ordering::SeqCst);
    })
}

/// A pool over three sentinels, the first of which is reachable.
pub fn pool(
    cluster: &Arc<MockCluster>,
    database: u32,
) -> ConnectionPool<
    MockConnection,
    StaticResolver,
    impl Fn(&Backend) -> MockConnection + Send + Sync + 'static,
> {
    cluster.bring_up("10.0.0.1:26379");
    let resolver =
        StaticResolver::new(vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    let d = discovery(cluster, resolver, 7, Arc::new(AtomicUsize::new(0)));
    ConnectionPool::from_discovery(d, database, test_log())
}
