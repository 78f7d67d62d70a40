//! Address resolution and failover (§5 "the address-info list returned by
//! name resolution is owned by the Connection that initiated the lookup").

use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::{anyhow, Context, Result};

/// Resolved address list for one connect attempt, consumed head-first.
/// When the current head fails to connect and more addresses remain, the
/// Reactor advances past it and retries without charging the per-part
/// retry budget (§4.4 "Address retry").
pub struct AddressList {
    addrs: Vec<SocketAddr>,
    next: usize,
}

impl AddressList {
    pub fn resolve(host: &str, port: u16) -> Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("resolving {host}:{port}"))?
            .collect();
        if addrs.is_empty() {
            return Err(anyhow!("no addresses for {host}:{port}"));
        }
        Ok(Self { addrs, next: 0 })
    }

    pub fn current(&self) -> Option<SocketAddr> {
        self.addrs.get(self.next).copied()
    }

    /// Release the exhausted head and advance. Returns `true` if another
    /// address is available to retry against.
    pub fn advance(&mut self) -> bool {
        if self.next < self.addrs.len() {
            self.next += 1;
        }
        self.next < self.addrs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolving_localhost_yields_at_least_one_address() {
        let list = AddressList::resolve("localhost", 80).expect("resolve");
        assert!(list.current().is_some());
    }

    #[test]
    fn advance_past_single_address_exhausts_list() {
        let mut list = AddressList {
            addrs: vec!["127.0.0.1:80".parse().unwrap()],
            next: 0,
        };
        assert!(!list.advance());
        assert_eq!(list.current(), None);
    }

    #[test]
    fn advance_moves_to_next_address() {
        let mut list = AddressList {
            addrs: vec!["127.0.0.1:80".parse().unwrap(), "127.0.0.2:80".parse().unwrap()],
            next: 0,
        };
        assert!(list.advance());
        assert_eq!(list.current(), Some("127.0.0.2:80".parse().unwrap()));
    }
}
