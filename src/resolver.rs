// Copyright 2020 Joyent, Inc.

use std::net::{IpAddr, ToSocketAddrs};

use crate::error::Error;

/// Sentinel resolver
///
/// A `Resolver` maps the logical sentinel hostname configured for a pool to
/// the concrete addresses of the sentinel processes behind it. The pool asks
/// again on every discovery attempt since sentinel membership can change, and
/// tries the addresses in the order they are returned. An address may be a
/// bare host (the pool's sentinel port is used) or carry its own port.
pub trait Resolver: Send + Sync {
    fn get_addresses(&self, host: &str) -> Result<Vec<String>, Error>;
}

/// A resolver that always returns the same address list, whatever host it is
/// asked about.
#[derive(Clone, Debug)]
pub struct StaticResolver {
    addresses: Vec<String>,
}

impl StaticResolver {
    pub fn new<S: Into<String>>(addresses: Vec<S>) -> Self {
        StaticResolver {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }
}

impl Resolver for StaticResolver {
    fn get_addresses(&self, _host: &str) -> Result<Vec<String>, Error> {
        Ok(self.addresses.clone())
    }
}

/// A resolver backed by the operating system's name lookup. Every IP address
/// the host maps to is returned once, in lookup order. When the host carries
/// a port (`host:port`) the returned addresses keep it.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn get_addresses(&self, host: &str) -> Result<Vec<String>, Error> {
        let (lookup, port) = split_port(host);

        let addrs = (lookup, port.unwrap_or(0))
            .to_socket_addrs()
            .map_err(|e| Error::ResolveFailure(format!("{}: {}", host, e)))?;

        let mut seen: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !seen.contains(&addr.ip()) {
                seen.push(addr.ip());
            }
        }

        Ok(seen
            .into_iter()
            .map(|ip| match (port, ip) {
                (Some(p), IpAddr::V6(v6)) => format!("[{}]:{}", v6, p),
                (Some(p), IpAddr::V4(v4)) => format!("{}:{}", v4, p),
                (None, ip) => ip.to_string(),
            })
            .collect())
    }
}

fn split_port(host: &str) -> (&str, Option<u16>) {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some((h, tail)) = rest.split_once(']') {
            return (h, tail.strip_prefix(':').and_then(|p| p.parse().ok()));
        }
    }
    match host.rsplit_once(':') {
        Some((h, p)) if !h.contains(':') => match p.parse() {
            Ok(port) => (h, Some(port)),
            Err(_) => (host, None),
        },
        _ => (host, None),
    }
}
