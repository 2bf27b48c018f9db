// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_more::{Add, AddAssign, Display, From, Into, Sub, SubAssign};
use serde_derive::Deserialize;
use slog::Logger;

use crate::backend::Backend;
use crate::connection::Connection;
use crate::error::Error;

/// The role a caller asks for, and the role a pooled connection is tagged
/// with once created.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Role {
    /// The writable replica.
    Master,
    /// A read-only replica.
    Slave,
    /// Either role, a slave being preferred when a new connection is made.
    Any,
}

impl fmt::Display for Role {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Master => String::from("master").fmt(fmt),
            Role::Slave => String::from("slave").fmt(fmt),
            Role::Any => String::from("any").fmt(fmt),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master" => Ok(Role::Master),
            "slave" => Ok(Role::Slave),
            "any" => Ok(Role::Any),
            _ => Err(Error::InvalidConfig(format!("unknown role: {}", s))),
        }
    }
}

/// The counters of the connection pool
#[derive(Copy, Clone, Debug, Default)]
pub struct ConnectionPoolStats {
    /// The count of idle connections in the pool
    pub idle_connections: ConnectionCount,
    /// The number of connections created by the pool
    pub created_connections: ConnectionCount,
    /// The number of cached connections found dead and discarded
    pub discarded_connections: ConnectionCount,
    /// Claims served from the idle cache
    pub cache_hits: ConnectionCount,
    /// Claims that required a new connection
    pub cache_misses: ConnectionCount,
}

impl ConnectionPoolStats {
    /// Create a new instance of `ConnectionPoolStats`
    pub fn new() -> Self {
        Self::default()
    }
}

/// The configuration options for a sentinel connection pool. This is required
/// to instantiate a new connection pool. Everything but the logger can be
/// deserialized from an application's configuration file.
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionPoolOptions {
    /// The logical hostname the sentinel processes are reachable under.
    pub sentinel_host: String,
    /// The name sentinels monitor the replica set under.
    pub master_name: String,
    /// An optional sentinel port used for resolved addresses that do not
    /// carry one. If not specified the default is 26379.
    #[serde(default)]
    pub sentinel_port: Option<u16>,
    /// An optional database index selected on every new connection. Zero, the
    /// default, means no selection command is issued.
    #[serde(default)]
    pub database: Option<u32>,
    /// An optional number of connect attempts made against the address the
    /// sentinel reports for the master. If not specified the default is 5.
    #[serde(default)]
    pub master_retries: Option<u32>,
    /// An optional delay in milliseconds between two master connect attempts.
    /// If not specified the default is 5000 milliseconds.
    #[serde(default)]
    pub master_retry_delay: Option<u64>,
    /// An optional `slog` logger instance. If none is provided then the logging
    /// will fall back to using the [`slog-stdlog`](https://docs.rs/slog-stdlog)
    /// drain which is essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    #[serde(skip)]
    pub log: Option<Logger>,
}

impl ConnectionPoolOptions {
    pub fn new<H, M>(sentinel_host: H, master_name: M) -> Self
    where
        H: Into<String>,
        M: Into<String>,
    {
        ConnectionPoolOptions {
            sentinel_host: sentinel_host.into(),
            master_name: master_name.into(),
            sentinel_port: None,
            database: None,
            master_retries: None,
            master_retry_delay: None,
            log: None,
        }
    }
}

/// A newtype wrapper around u32 used for the connection pool counters.
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    Eq,
    From,
    Into,
    Ord,
    PartialOrd,
    PartialEq,
    Sub,
    SubAssign,
)]
pub struct ConnectionCount(u32);

/// A connection together with the role the pool tagged it with and the
/// backend it is connected to. This is what `ConnectionPool::get` hands out
/// and what `ConnectionPool::put` takes back.
#[derive(Debug)]
pub struct TaggedConnection<C> {
    role: Role,
    backend: Backend,
    connection: C,
}

impl<C> TaggedConnection<C>
where
    C: Connection,
{
    pub(crate) fn new(role: Role, backend: Backend, connection: C) -> Self {
        TaggedConnection {
            role,
            backend,
            connection,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Take the underlying connection, dropping the pool's tag.
    pub fn into_inner(self) -> C {
        self.connection
    }
}

impl<C> Deref for TaggedConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> DerefMut for TaggedConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}

// The internal data structures used to manage the connection pool.
#[doc(hidden)]
#[derive(Debug)]
pub struct ConnectionData<C> {
    pub connections: Vec<TaggedConnection<C>>,
    pub stats: ConnectionPoolStats,
    pub state: ConnectionPoolState,
}

impl<C> ConnectionData<C>
where
    C: Connection,
{
    #[doc(hidden)]
    pub fn new() -> Self {
        ConnectionData {
            connections: Vec::new(),
            stats: ConnectionPoolStats::new(),
            state: ConnectionPoolState::Running,
        }
    }
}

// Protected access to the internal connection pool data structures
#[doc(hidden)]
#[derive(Debug)]
pub struct ProtectedData<C>(Arc<Mutex<ConnectionData<C>>>);

impl<C> ProtectedData<C>
where
    C: Connection,
{
    pub fn new(connection_data: ConnectionData<C>) -> Self {
        ProtectedData(Arc::new(Mutex::new(connection_data)))
    }

    // A holder that panicked cannot leave the cache half-updated, so a
    // poisoned lock is still usable.
    pub fn connection_data_lock(&self) -> MutexGuard<ConnectionData<C>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> Clone for ProtectedData<C>
where
    C: Connection,
{
    fn clone(&self) -> ProtectedData<C> {
        ProtectedData(Arc::clone(&self.0))
    }
}

/// Sum type representing the current state of the connection pool. Possible
/// states are running or stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionPoolState {
    /// The pool is running and able to service connection requests.
    Running,
    /// The connection pool is stopped and is no longer accepting connection
    /// requests.
    Stopped,
}

impl fmt::Display for ConnectionPoolState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionPoolState::Running => String::from("running").fmt(fmt),
            ConnectionPoolState::Stopped => String::from("stopped").fmt(fmt),
        }
    }
}
