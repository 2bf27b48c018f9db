// Copyright 2020 Joyent, Inc.

pub mod types;

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use slog::{debug, info, o, trace, warn, Drain, Logger};

use crate::backend::Backend;
use crate::command::{Command, Reply};
use crate::connection::Connection;
use crate::connection_pool::types::{
    ConnectionData, ConnectionPoolOptions, ConnectionPoolState,
    ConnectionPoolStats, ProtectedData, Role, TaggedConnection,
};
use crate::error::Error;
use crate::resolver::Resolver;
use crate::sentinel::{
    SentinelDiscovery, SlaveOutcome, DEFAULT_MASTER_RETRIES,
    DEFAULT_MASTER_RETRY_DELAY, DEFAULT_SENTINEL_PORT,
};

/// A pool of role-tagged connections to a sentinel-monitored replica set
pub struct ConnectionPool<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    protected_data: ProtectedData<C>,
    discovery: Arc<SentinelDiscovery<C, R, F>>,
    database: Arc<AtomicU32>,
    log: Logger,
}

impl<C, R, F> Clone for ConnectionPool<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    fn clone(&self) -> ConnectionPool<C, R, F> {
        ConnectionPool {
            protected_data: self.protected_data.clone(),
            discovery: Arc::clone(&self.discovery),
            database: Arc::clone(&self.database),
            log: self.log.clone(),
        }
    }
}

impl<C, R, F> ConnectionPool<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    pub fn new(
        cpo: ConnectionPoolOptions,
        resolver: R,
        create_connection: F,
    ) -> Result<Self, Error> {
        if cpo.sentinel_host.is_empty() {
            return Err(Error::InvalidConfig(
                "sentinel host must not be empty".into(),
            ));
        }
        if cpo.master_name.is_empty() {
            return Err(Error::InvalidConfig(
                "master name must not be empty".into(),
            ));
        }

        let master_retries =
            cpo.master_retries.unwrap_or(DEFAULT_MASTER_RETRIES);
        if master_retries == 0 {
            return Err(Error::InvalidConfig(
                "master retries must be at least 1".into(),
            ));
        }
        let master_retry_delay = Duration::from_millis(
            cpo.master_retry_delay.unwrap_or(DEFAULT_MASTER_RETRY_DELAY),
        );

        let logger = cpo
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));

        let discovery = SentinelDiscovery::new(
            cpo.sentinel_host,
            cpo.master_name,
            resolver,
            create_connection,
            logger.clone(),
        )
        .with_sentinel_port(cpo.sentinel_port.unwrap_or(DEFAULT_SENTINEL_PORT))
        .with_master_retries(master_retries, master_retry_delay);

        Ok(Self::from_discovery(
            discovery,
            cpo.database.unwrap_or(0),
            logger,
        ))
    }

    /// Build a pool around an already configured discovery, e.g. one with a
    /// seeded random source or a custom sleep function.
    pub fn from_discovery(
        discovery: SentinelDiscovery<C, R, F>,
        database: u32,
        log: Logger,
    ) -> Self {
        let log = log.new(o!("master_name" => discovery.master_name().to_string()));
        ConnectionPool {
            protected_data: ProtectedData::new(ConnectionData::new()),
            discovery: Arc::new(discovery),
            database: Arc::new(AtomicU32::new(database)),
            log,
        }
    }

    /// Hand out a live connection for `role`, reusing an idle one when the
    /// cache holds a match and creating one through sentinel discovery
    /// otherwise.
    pub fn get(&self, role: Role) -> Result<TaggedConnection<C>, Error> {
        let candidate = {
            let mut connection_data =
                self.protected_data.connection_data_lock();
            if connection_data.state == ConnectionPoolState::Stopped {
                return Err(Error::PoolStopped);
            }

            let position = match role {
                Role::Any => {
                    if connection_data.connections.is_empty() {
                        None
                    } else {
                        Some(0)
                    }
                }
                Role::Master | Role::Slave => connection_data
                    .connections
                    .iter()
                    .position(|c| c.role() == role),
            };

            position.map(|idx| {
                connection_data.stats.idle_connections -= 1.into();
                connection_data.connections.swap_remove(idx)
            })
        };

        // Only one cached candidate is inspected per call. If it turns out
        // dead a new connection is created rather than scanning further.
        if let Some(mut conn) = candidate {
            if conn.is_valid() {
                debug!(
                    self.log,
                    "Found idle {} connection for backend {}",
                    conn.role(),
                    conn.backend()
                );
                self.protected_data.connection_data_lock().stats.cache_hits +=
                    1.into();
                return Ok(conn);
            }

            warn!(
                self.log,
                "Found an invalid {} connection for backend {}, discarding it",
                conn.role(),
                conn.backend()
            );
            self.protected_data
                .connection_data_lock()
                .stats
                .discarded_connections += 1.into();
            close_connection(&self.log, conn);
        }

        self.protected_data.connection_data_lock().stats.cache_misses +=
            1.into();

        let mut conn = self.create_connection(role)?;
        self.protected_data
            .connection_data_lock()
            .stats
            .created_connections += 1.into();

        let database = self.database();
        if database != 0 {
            if let Err(e) = select_database(&mut *conn, database) {
                warn!(self.log, "Unable to select database {}: {}", database, e);
                close_connection(&self.log, conn);
                return Err(e);
            }
        }

        Ok(conn)
    }

    /// Return a connection to the idle cache. Its liveness is checked the
    /// next time it is handed out, not here.
    pub fn put(&self, conn: TaggedConnection<C>) {
        let mut connection_data = self.protected_data.connection_data_lock();
        match connection_data.state {
            ConnectionPoolState::Running => {
                trace!(
                    self.log,
                    "Returning {} connection for backend {}",
                    conn.role(),
                    conn.backend()
                );
                connection_data.connections.push(conn);
                connection_data.stats.idle_connections += 1.into();
            }
            ConnectionPoolState::Stopped => {
                drop(connection_data);
                close_connection(&self.log, conn);
            }
        }
    }

    /// Like `get`, but the connection goes back to the pool when the
    /// returned guard is dropped.
    pub fn claim(&self, role: Role) -> Result<PoolConnection<C, R, F>, Error> {
        let conn = self.get(role)?;
        Ok(PoolConnection {
            connection_pool: self.clone(),
            connection: Some(conn),
        })
    }

    /// Stop the connection pool and close every idle connection. Connections
    /// returned after this point are closed instead of cached.
    pub fn stop(&self) {
        let connections: Vec<TaggedConnection<C>> = {
            let mut connection_data =
                self.protected_data.connection_data_lock();
            connection_data.state = ConnectionPoolState::Stopped;
            connection_data.stats.idle_connections = 0.into();
            connection_data.connections.drain(..).collect()
        };

        info!(self.log, "Stopping pool, closing {} idle connections", connections.len());
        for conn in connections {
            close_connection(&self.log, conn);
        }
    }

    pub fn get_stats(&self) -> ConnectionPoolStats {
        self.protected_data.connection_data_lock().stats
    }

    pub fn get_state(&self) -> String {
        self.protected_data.connection_data_lock().state.to_string()
    }

    pub fn database(&self) -> u32 {
        self.database.load(AtomicOrdering::Relaxed)
    }

    /// Change the database selected on connections created from now on.
    /// Idle connections keep the database they were created with.
    pub fn set_database(&self, database: u32) {
        self.database.store(database, AtomicOrdering::Relaxed);
    }

    fn create_connection(&self, role: Role) -> Result<TaggedConnection<C>, Error> {
        match role {
            Role::Master => self.create_master_connection(),
            Role::Slave => match self.discovery.create_slave_connection()? {
                SlaveOutcome::Connected(backend, conn) => {
                    Ok(TaggedConnection::new(Role::Slave, backend, conn))
                }
                SlaveOutcome::NoSlaveAvailable => Err(Error::CannotFindSlave),
            },
            Role::Any => match self.discovery.create_slave_connection()? {
                SlaveOutcome::Connected(backend, conn) => {
                    Ok(TaggedConnection::new(Role::Slave, backend, conn))
                }
                SlaveOutcome::NoSlaveAvailable => {
                    info!(self.log, "No slave available, falling back to master");
                    self.create_master_connection()
                }
            },
        }
    }

    fn create_master_connection(&self) -> Result<TaggedConnection<C>, Error> {
        let (backend, conn) = self.discovery.create_master_connection()?;
        Ok(TaggedConnection::new(Role::Master, backend, conn))
    }
}

/// A pooled connection that returns itself to its pool when dropped
pub struct PoolConnection<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    connection_pool: ConnectionPool<C, R, F>,
    connection: Option<TaggedConnection<C>>,
}

impl<C, R, F> PoolConnection<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    pub fn role(&self) -> Role {
        self.tagged().role()
    }

    pub fn backend(&self) -> &Backend {
        self.tagged().backend()
    }

    /// Take the connection out of the guard; it will not be returned to the
    /// pool.
    pub fn detach(mut self) -> TaggedConnection<C> {
        // The guard always holds a connection until dropped or detached.
        self.connection.take().expect("pool connection already taken")
    }

    fn tagged(&self) -> &TaggedConnection<C> {
        self.connection.as_ref().expect("pool connection already taken")
    }
}

impl<C, R, F> Drop for PoolConnection<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.connection_pool.put(conn);
        }
    }
}

impl<C, R, F> Deref for PoolConnection<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    type Target = C;

    fn deref(&self) -> &C {
        self.tagged()
    }
}

impl<C, R, F> DerefMut for PoolConnection<C, R, F>
where
    C: Connection,
    R: Resolver,
    F: Fn(&Backend) -> C + Send + Sync + 'static,
{
    fn deref_mut(&mut self) -> &mut C {
        self.connection.as_mut().expect("pool connection already taken")
    }
}

fn select_database<C>(conn: &mut C, database: u32) -> Result<(), Error>
where
    C: Connection,
{
    let command = Command::new("SELECT").arg(database);
    match conn.run(&command) {
        Ok(Reply::Error(msg)) => Err(Error::Command(format!("{}: {}", command, msg))),
        Ok(_) => Ok(()),
        Err(e) => Err(Error::Command(format!("{}: {}", command, e))),
    }
}

fn close_connection<C>(log: &Logger, mut conn: TaggedConnection<C>)
where
    C: Connection,
{
    debug!(log, "Closing connection for backend {}", conn.backend());
    if let Err(err) = conn.close() {
        warn!(
            log,
            "Failed to properly close connection for backend {}. Reason: {}",
            conn.backend(),
            err
        );
    }
}
