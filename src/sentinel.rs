// Copyright 2020 Joyent, Inc.

//! Topology discovery through sentinel processes.
//!
//! Sentinels are asked where the master of a replica set lives and which
//! slaves it has. Every lookup starts by resolving the sentinel hostname and
//! walking the resulting addresses in order until one of them accepts a
//! connection. The slave list is shuffled before it is walked so that callers
//! spread over the healthy slaves; the master address is retried a bounded
//! number of times with a fixed delay since a failover may be in progress.

use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use slog::{debug, info, o, warn, Logger};

use crate::backend::{Backend, BackendPort};
use crate::command::{Command, Reply};
use crate::connection::Connection;
use crate::error::Error;
use crate::resolver::Resolver;

// Sentinel default port
pub const DEFAULT_SENTINEL_PORT: BackendPort = 26379;
// Connect attempts against the reported master address
pub const DEFAULT_MASTER_RETRIES: u32 = 5;
// Delay between master connect attempts in milliseconds
pub const DEFAULT_MASTER_RETRY_DELAY: u64 = 5000;

// Field positions in a `SENTINEL slaves` record, which is a flat list of
// alternating names and values.
const SLAVE_IP_FIELD: usize = 3;
const SLAVE_PORT_FIELD: usize = 5;
const SLAVE_FLAGS_FIELD: usize = 9;

/// Outcome of a slave lookup that reached a sentinel.
#[derive(Debug)]
pub enum SlaveOutcome<C> {
    Connected(Backend, C),
    /// The sentinel listed no healthy slave that accepted a connection.
    NoSlaveAvailable,
}

type Sleep = Box<dyn Fn(Duration) + Send + Sync>;

/// Sentinel-driven discovery of master and slave connections for one
/// replica set.
pub struct SentinelDiscovery<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    sentinel_host: String,
    sentinel_port: BackendPort,
    master_name: String,
    master_retries: u32,
    master_retry_delay: Duration,
    resolver: R,
    create_connection: F,
    rng: Mutex<Box<dyn RngCore + Send>>,
    sleep: Sleep,
    log: Logger,
    _connection: PhantomData<fn() -> C>,
}

impl<C, R, F> SentinelDiscovery<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    pub fn new<H, M>(
        sentinel_host: H,
        master_name: M,
        resolver: R,
        create_connection: F,
        log: Logger,
    ) -> Self
    where
        H: Into<String>,
        M: Into<String>,
    {
        let sentinel_host = sentinel_host.into();
        let master_name = master_name.into();
        let log = log.new(o!(
            "sentinel_host" => sentinel_host.clone(),
            "master_name" => master_name.clone()
        ));

        SentinelDiscovery {
            sentinel_host,
            sentinel_port: DEFAULT_SENTINEL_PORT,
            master_name,
            master_retries: DEFAULT_MASTER_RETRIES,
            master_retry_delay: Duration::from_millis(
                DEFAULT_MASTER_RETRY_DELAY,
            ),
            resolver,
            create_connection,
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
            sleep: Box::new(thread::sleep),
            log,
            _connection: PhantomData,
        }
    }

    pub fn with_sentinel_port(mut self, port: BackendPort) -> Self {
        self.sentinel_port = port;
        self
    }

    /// Set the master retry budget and the delay between two attempts.
    pub fn with_master_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.master_retries = retries;
        self.master_retry_delay = delay;
        self
    }

    /// Replace the random source used to shuffle the slave list.
    pub fn with_rng<G>(mut self, rng: G) -> Self
    where
        G: RngCore + Send + 'static,
    {
        self.rng = Mutex::new(Box::new(rng));
        self
    }

    /// Replace the function used to wait between master connect attempts.
    pub fn with_sleep<S>(mut self, sleep: S) -> Self
    where
        S: Fn(Duration) + Send + Sync + 'static,
    {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Build a connection for `backend` and connect it.
    pub fn connect(&self, backend: &Backend) -> Result<C, Error> {
        let mut conn = (self.create_connection)(backend);
        conn.connect().map_err(|e| Error::UnableToConnect {
            endpoint: backend.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(conn)
    }

    /// Connect to the first reachable sentinel, trying the resolved
    /// addresses in resolver order.
    pub fn sentinel_connection(&self) -> Result<C, Error> {
        let addresses = match self.resolver.get_addresses(&self.sentinel_host) {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(self.log, "Unable to resolve sentinel host: {}", e);
                return Err(Error::CannotFindSentinel);
            }
        };

        info!(
            self.log,
            "Found {} sentinels: {}",
            addresses.len(),
            addresses.join(", ")
        );

        for address in addresses.iter() {
            let backend = Backend::from_address(address, self.sentinel_port);
            info!(self.log, "Trying sentinel {}", backend);
            match self.connect(&backend) {
                Ok(conn) => return Ok(conn),
                Err(e) => warn!(self.log, "{} is down: {}", backend, e),
            }
        }

        Err(Error::CannotFindSentinel)
    }

    /// Connect to a slave the sentinel reports as healthy, picked at random.
    pub fn create_slave_connection(&self) -> Result<SlaveOutcome<C>, Error> {
        let mut sentinel = self.sentinel_connection()?;
        let res = self.find_slave(&mut sentinel);
        self.close_sentinel(sentinel);
        res
    }

    /// Connect to the master the sentinel reports. The sentinel is asked
    /// again before every attempt since the master may be moving.
    pub fn create_master_connection(&self) -> Result<(Backend, C), Error> {
        let mut sentinel = self.sentinel_connection()?;
        let res = self.find_master(&mut sentinel);
        self.close_sentinel(sentinel);
        res
    }

    fn find_slave(&self, sentinel: &mut C) -> Result<SlaveOutcome<C>, Error> {
        let command = Command::new("SENTINEL")
            .arg("slaves")
            .arg(&self.master_name);

        let mut slaves = match self.query(sentinel, &command)? {
            Reply::Array(records) => records,
            other => {
                return Err(Error::UnexpectedReply(format!(
                    "{} returned {}",
                    command, other
                )))
            }
        };

        {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            shuffle(&mut slaves, &mut **rng);
        }

        for record in slaves.iter() {
            if record.str_at(SLAVE_FLAGS_FIELD) != Some("slave") {
                continue;
            }

            let backend = match slave_backend(record) {
                Some(backend) => backend,
                None => {
                    warn!(self.log, "Skipping malformed slave record {}", record);
                    continue;
                }
            };

            match self.connect(&backend) {
                Ok(conn) => {
                    info!(self.log, "Connected to slave {}", backend);
                    return Ok(SlaveOutcome::Connected(backend, conn));
                }
                Err(e) => warn!(
                    self.log,
                    "Error on connection to slave {} declared to be up: {}",
                    backend,
                    e
                ),
            }
        }

        Ok(SlaveOutcome::NoSlaveAvailable)
    }

    fn find_master(&self, sentinel: &mut C) -> Result<(Backend, C), Error> {
        let command = Command::new("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(&self.master_name);

        let mut attempts = 0;
        while attempts < self.master_retries {
            let reply = self.query(sentinel, &command)?;
            let backend = master_backend(&reply).ok_or_else(|| {
                Error::UnexpectedReply(format!("{} returned {}", command, reply))
            })?;

            match self.connect(&backend) {
                Ok(conn) => {
                    info!(self.log, "Connected to master {}", backend);
                    return Ok((backend, conn));
                }
                Err(e) => warn!(
                    self.log,
                    "Error on connection to master {} declared to be up: {}",
                    backend,
                    e
                ),
            }

            attempts += 1;
            if attempts < self.master_retries {
                info!(
                    self.log,
                    "Waiting {:?} before asking for the master again",
                    self.master_retry_delay
                );
                (self.sleep)(self.master_retry_delay);
            }
        }

        Err(Error::CannotFindMaster(self.master_name.clone()))
    }

    fn close_sentinel(&self, mut sentinel: C) {
        if let Err(err) = sentinel.close() {
            warn!(
                self.log,
                "Failed to properly close sentinel connection. Reason: {}", err
            );
        }
    }

    fn query(&self, sentinel: &mut C, command: &Command) -> Result<Reply, Error> {
        debug!(self.log, "Sending {}", command);
        sentinel
            .append(command)
            .and_then(|_| sentinel.get_reply())
            .map_err(|e| Error::Command(format!("{}: {}", command, e)))
            .and_then(|reply| match reply {
                Reply::Error(msg) => {
                    Err(Error::Command(format!("{}: {}", command, msg)))
                }
                reply => Ok(reply),
            })
    }
}

fn slave_backend(record: &Reply) -> Option<Backend> {
    let host = record.str_at(SLAVE_IP_FIELD)?;
    let port = record.str_at(SLAVE_PORT_FIELD)?.parse::<BackendPort>().ok()?;
    Some(Backend::new(host, port))
}

fn master_backend(reply: &Reply) -> Option<Backend> {
    let host = reply.str_at(0)?;
    let port = reply.str_at(1)?.parse::<BackendPort>().ok()?;
    Some(Backend::new(host, port))
}

/// Fisher-Yates shuffle
pub fn shuffle<T, R>(items: &mut [T], rng: &mut R)
where
    R: Rng + ?Sized,
{
    let mut i = items.len();
    while i > 1 {
        i -= 1;
        let new_idx = rng.gen_range(0..=i);
        items.swap(i, new_idx);
    }
}
