// Copyright 2020 Joyent, Inc.

use thiserror::Error;

use crate::backend::BackendName;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// A connect to a specific backend failed. Discovery recovers from this
    /// locally; it never surfaces from `ConnectionPool::get`.
    #[error("unable to connect to {endpoint}: {reason}")]
    UnableToConnect {
        endpoint: BackendName,
        reason: String,
    },
    #[error("cannot find sentinel")]
    CannotFindSentinel,
    #[error("cannot find slave")]
    CannotFindSlave,
    #[error("unable to find master of name: {0} (too many retries)")]
    CannotFindMaster(String),
    #[error("sentinel host resolution failed: {0}")]
    ResolveFailure(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("connection pool is stopped")]
    PoolStopped,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
