// Copyright 2020 Joyent, Inc.

//! A blocking RESP connection over TCP for use with `sentinel-pool`. The same
//! connection type serves sentinel sessions and store sessions.

pub mod codec;

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_derive::Deserialize;
use thiserror::Error;

use sentinel_pool::backend::Backend;
use sentinel_pool::command::{Command, Reply};
use sentinel_pool::connection::Connection;

#[derive(Debug, Error)]
pub enum RespError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed by peer")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("unable to resolve {0}")]
    Resolve(String),
}

/// Socket settings applied to every connection a creator builds. Timeouts
/// are in milliseconds; none means block indefinitely.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RespConnectionConfig {
    #[serde(default)]
    pub connect_timeout: Option<u64>,
    #[serde(default)]
    pub read_timeout: Option<u64>,
}

#[derive(Debug)]
pub struct RespConnection {
    stream: Option<BufReader<TcpStream>>,
    backend: Backend,
    config: RespConnectionConfig,
    // Replies owed for commands appended so far
    pending: usize,
    broken: bool,
}

impl RespConnection {
    pub fn new(b: &Backend, config: RespConnectionConfig) -> Self {
        RespConnection {
            stream: None,
            backend: b.clone(),
            config,
            pending: 0,
            broken: false,
        }
    }

    pub fn connection_creator(
        config: RespConnectionConfig,
    ) -> impl Fn(&Backend) -> RespConnection + Send + Sync + 'static {
        move |b| RespConnection::new(b, config.clone())
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    fn open(&self, addr: &SocketAddr) -> io::Result<TcpStream> {
        let stream = match self.config.connect_timeout {
            Some(ms) => {
                TcpStream::connect_timeout(addr, Duration::from_millis(ms))?
            }
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(self.config.read_timeout.map(Duration::from_millis))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn reader(&mut self) -> Result<&mut BufReader<TcpStream>, RespError> {
        self.stream.as_mut().ok_or(RespError::NotConnected)
    }
}

impl Connection for RespConnection {
    type Error = RespError;

    fn connect(&mut self) -> Result<(), Self::Error> {
        let addrs: Vec<SocketAddr> = (self.backend.host.as_str(), self.backend.port)
            .to_socket_addrs()
            .map_err(|_| RespError::Resolve(self.backend.name.clone()))?
            .collect();

        let mut last_err = RespError::Resolve(self.backend.name.clone());
        for addr in addrs.iter() {
            match self.open(addr) {
                Ok(stream) => {
                    self.stream = Some(BufReader::new(stream));
                    self.pending = 0;
                    self.broken = false;
                    return Ok(());
                }
                Err(e) => last_err = RespError::Io(e),
            }
        }
        Err(last_err)
    }

    fn is_valid(&mut self) -> bool {
        if self.broken || self.stream.is_none() {
            return false;
        }
        // Unread replies would be taken for the PING answer.
        if self.pending != 0 {
            return false;
        }
        match self.run(&Command::new("PING")) {
            Ok(Reply::Status(ref s)) => s == "PONG",
            _ => false,
        }
    }

    fn append(&mut self, command: &Command) -> Result<(), Self::Error> {
        let res = self
            .reader()
            .and_then(|reader| codec::write_command(reader.get_mut(), command));
        match res {
            Ok(()) => {
                self.pending += 1;
                Ok(())
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    fn get_reply(&mut self) -> Result<Reply, Self::Error> {
        if self.pending == 0 {
            return Err(RespError::Protocol("no reply pending".into()));
        }
        match self.reader().and_then(codec::read_reply) {
            Ok(reply) => {
                self.pending -= 1;
                Ok(reply)
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.stream = None;
        self.pending = 0;
        Ok(())
    }
}
