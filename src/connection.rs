// Copyright 2020 Joyent, Inc.

use std::error;

use crate::command::{Command, Reply};

/// A session to a single store or sentinel node
///
/// The `Connection` trait defines the interface that must be implemented in
/// order to participate in a sentinel connection pool. The pool is handed a
/// function that builds an unconnected instance for a given
/// [`Backend`](../backend/struct.Backend.html) and then calls `connect` on it;
/// the same function is used for sentinel sessions and for store sessions.
pub trait Connection: Send + Sized + 'static {
    /// The error type returned by the connection operations. Each
    /// implementation may choose the concrete error type relevant to its
    /// transport as long as it implements the standard library
    /// [Error](https://doc.rust-lang.org/std/error/trait.Error.html) trait.
    type Error: error::Error;
    /// Attempt to establish the connection to the backend. A failure here is
    /// reported by the pool as `UnableToConnect`.
    fn connect(&mut self) -> Result<(), Self::Error>;
    /// Report whether the connection is still usable. The pool checks this
    /// every time an idle connection is taken out of its cache.
    fn is_valid(&mut self) -> bool;
    /// Send a command without waiting for its reply.
    fn append(&mut self, command: &Command) -> Result<(), Self::Error>;
    /// Receive the reply to the oldest command not yet answered.
    fn get_reply(&mut self) -> Result<Reply, Self::Error>;
    /// Send a command and wait for its reply.
    fn run(&mut self, command: &Command) -> Result<Reply, Self::Error> {
        self.append(command)?;
        self.get_reply()
    }
    /// Close the connection to the backend
    fn close(&mut self) -> Result<(), Self::Error>;
}
