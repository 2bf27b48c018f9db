// Copyright 2020 Joyent, Inc.

//! A role-aware connection pool for sentinel-monitored replica sets
//!
//! A replica set has one writable *master* and any number of read-only
//! *slaves*. Which node holds which role changes over time, and a separate
//! set of *sentinel* processes keeps track of it. This crate pools connections
//! to such a replica set: callers ask for a [`Role`](connection_pool/types/enum.Role.html)
//! and get back a live connection to a node currently holding that role.
//!
//! The pool relies on two traits, in the same way a generic multi-node
//! connection pool would: the [`Resolver`](resolver/trait.Resolver.html)
//! trait and the [`Connection`](connection/trait.Connection.html) trait.
//!
//! ## Resolvers
//!
//! A *resolver* maps the logical sentinel hostname to the concrete addresses
//! of the sentinel processes behind it. A hostname may stand for several
//! sentinels for redundancy. [`SystemResolver`](resolver/struct.SystemResolver.html)
//! uses the operating system's name lookup and
//! [`StaticResolver`](resolver/struct.StaticResolver.html) returns a fixed
//! list.
//!
//! ## Connections
//!
//! A *connection* is a session to one node able to send a
//! [`Command`](command/struct.Command.html) and receive a
//! [`Reply`](command/enum.Reply.html). Users provide the pool with a function
//! building an unconnected instance for a given
//! [`Backend`](backend/struct.Backend.html):
//! ```rust,ignore
//! Fn(&Backend) -> C + Send + Sync + 'static
//! where C: Connection
//! ```
//! The same function is used for sentinel sessions and store sessions.
//!
//! ## Acquisition
//!
//! `get(role)` first looks for an idle connection tagged with the role (or
//! any idle connection for `Role::Any`) and checks that it is still valid. On
//! a miss the sentinels are consulted:
//!
//! * `Role::Master` asks for the master address and retries the connect a
//!   bounded number of times with a fixed delay, asking again each time.
//! * `Role::Slave` asks for the slave list, shuffles it and connects to the
//!   first healthy slave that accepts.
//! * `Role::Any` tries a slave and falls back to the master only when no
//!   slave is available. An unreachable sentinel is not a reason to fall
//!   back.
//!
//! New connections get a `SELECT` for the configured database if it is not
//! zero. `put` returns a connection to the idle cache; `claim` wraps `get` in
//! a guard that does so when dropped.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Mutex;
//! use std::thread;
//!
//! use slog::{o, Drain, Logger};
//!
//! use sentinel_pool::connection_pool::types::{ConnectionPoolOptions, Role};
//! use sentinel_pool::connection_pool::ConnectionPool;
//! use sentinel_pool::resolver::SystemResolver;
//! use resp_connection::{RespConnection, RespConnectionConfig};
//!
//! let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
//! let log = Logger::root(
//!     Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
//!     o!("build-id" => "0.1.0"),
//! );
//!
//! let mut pool_opts = ConnectionPoolOptions::new("sentinels.local", "mymaster");
//! pool_opts.database = Some(2);
//! pool_opts.log = Some(log);
//!
//! let pool = ConnectionPool::new(
//!     pool_opts,
//!     SystemResolver,
//!     RespConnection::connection_creator(RespConnectionConfig::default()),
//! )?;
//!
//! for _ in 0..10 {
//!     let pool = pool.clone();
//!     thread::spawn(move || {
//!         let conn = pool.claim(Role::Any)?;
//!         // Do stuff here
//!         // The connection is returned to the pool when it falls out of scope.
//!     });
//! }
//! ```

#![allow(missing_docs)]

pub mod backend;
pub mod command;
pub mod connection;
pub mod connection_pool;
pub mod error;
pub mod resolver;
pub mod sentinel;
