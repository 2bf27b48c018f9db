// Copyright 2020 Joyent, Inc.

use std::fmt;

/// The port number for a backend. This is a type alias for u16.
pub type BackendPort = u16;
/// The concatenation of the backend host and port with a colon
/// delimiter. This is a type alias for String.
pub type BackendName = String;
/// The host of a backend, either an IP address literal or a hostname.
pub type BackendHost = String;

/// A network endpoint of a store node or of a sentinel process.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Backend {
    /// The concatenation of the backend host and port with a colon delimiter.
    pub name: BackendName,
    /// The host of the backend.
    pub host: BackendHost,
    /// The port of the backend.
    pub port: BackendPort,
}

impl Backend {
    /// Return a new instance of `Backend` given a host and `BackendPort`.
    pub fn new<H: Into<BackendHost>>(host: H, port: BackendPort) -> Self {
        let host = host.into();
        Backend {
            name: backend_name(&host, port),
            host,
            port,
        }
    }

    /// Build a `Backend` from an address as handed out by a resolver. The
    /// address may carry its own port (`host:port` or `[v6]:port`); a bare
    /// host or IP literal gets `default_port`.
    pub fn from_address(address: &str, default_port: BackendPort) -> Self {
        let address = address.trim();

        if let Some(rest) = address.strip_prefix('[') {
            if let Some((host, tail)) = rest.split_once(']') {
                let port = tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<BackendPort>().ok())
                    .unwrap_or(default_port);
                return Backend::new(host, port);
            }
        }

        // More than one colon without brackets is an IPv6 literal.
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                match port.parse::<BackendPort>() {
                    Ok(port) => Backend::new(host, port),
                    Err(_) => Backend::new(address, default_port),
                }
            }
            _ => Backend::new(address, default_port),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.name.fmt(fmt)
    }
}

// Concatentate the backend host and port with a colon delimiter. IPv6
// literals are bracketed so the name stays parseable.
fn backend_name(host: &str, port: BackendPort) -> BackendName {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        [host, ":", &port.to_string()].concat()
    }
}
