//! Address resolution helpers.
//!
//! Resolution goes through the OS resolver via the standard library;
//! services must be numeric ports.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{check_io, fail, ErrorKind, Result};

/// An ordered list of resolved socket addresses.
///
/// Produced by [`resolve`] and [`resolve_host`] and consumed by the
/// connect/bind helpers on [`Socket`](crate::Socket). Addresses keep the
/// order the resolver returned them in.
#[derive(Clone, Debug, Default)]
pub struct AddrList {
    addrs: Vec<SocketAddr>,
}

impl AddrList {
    /// Returns the number of addresses in the list.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Returns true if the list holds no addresses.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Iterates over the addresses in resolver order.
    pub fn iter(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.addrs.iter().copied()
    }

    /// Returns the addresses as a slice.
    pub fn as_slice(&self) -> &[SocketAddr] {
        &self.addrs
    }
}

impl From<Vec<SocketAddr>> for AddrList {
    fn from(addrs: Vec<SocketAddr>) -> AddrList {
        AddrList { addrs }
    }
}

impl<'a> IntoIterator for &'a AddrList {
    type Item = SocketAddr;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, SocketAddr>>;

    fn into_iter(self) -> Self::IntoIter {
        self.addrs.iter().copied()
    }
}

pub(crate) fn parse_service(service: &str) -> Result<u16> {
    if service.is_empty() {
        return fail(ErrorKind::BadString);
    }
    match service.parse() {
        Ok(port) => Ok(port),
        Err(_) => fail(ErrorKind::InvalidArgument),
    }
}

/// Resolves `host` and a numeric `service` into an address list.
pub fn resolve(host: &str, service: &str) -> Result<AddrList> {
    if host.is_empty() {
        return fail(ErrorKind::BadString);
    }
    let port = parse_service(service)?;
    let addrs: Vec<_> = check_io((host, port).to_socket_addrs())?.collect();
    Ok(AddrList { addrs })
}

/// Resolves every address of `host` (port zero).
pub fn resolve_host(host: &str) -> Result<AddrList> {
    resolve(host, "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_arguments() {
        assert_eq!(
            resolve("", "80").unwrap_err().kind(),
            ErrorKind::BadString
        );
        assert_eq!(
            resolve("localhost", "").unwrap_err().kind(),
            ErrorKind::BadString
        );
        assert_eq!(
            resolve("localhost", "http").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn resolves_loopback() {
        let addrs = resolve("127.0.0.1", "6502").unwrap();
        assert!(!addrs.is_empty());
        let first = addrs.iter().next().unwrap();
        assert_eq!(first, "127.0.0.1:6502".parse().unwrap());
    }

    #[test]
    fn keeps_resolver_order() {
        let addrs: AddrList = vec![
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.2:2".parse().unwrap(),
        ]
        .into();
        let collected: Vec<_> = addrs.iter().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0], "127.0.0.1:1".parse().unwrap());
    }
}
