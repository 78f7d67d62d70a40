//! SOCKS4/4a/5 handshake framing (§6 "SOCKS wire", §4.2 "Outbound via
//! SOCKS").

use std::net::Ipv4Addr;

use anyhow::{anyhow, Result};

pub const SOCKS5_VERSION: u8 = 0x05;
pub const SOCKS4_VERSION: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
    UserPass,
}

impl AuthMethod {
    pub fn code(self) -> u8 {
        match self {
            AuthMethod::NoAuth => 0x00,
            AuthMethod::UserPass => 0x02,
        }
    }
}

/// SOCKS4 `CONNECT` request. `host` present (vs a resolved IPv4) selects
/// SOCKS4a, which encodes `0.0.0.x` and appends the hostname after the
/// user-id field.
pub fn socks4_connect_request(dest: Option<Ipv4Addr>, host: Option<&str>, port: u16, user_id: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + user_id.len());
    buf.push(SOCKS4_VERSION);
    buf.push(0x01); // CONNECT
    buf.extend_from_slice(&port.to_be_bytes());
    match dest {
        Some(ip) => buf.extend_from_slice(&ip.octets()),
        None => buf.extend_from_slice(&[0, 0, 0, 1]),
    }
    buf.extend_from_slice(user_id.as_bytes());
    buf.push(0x00);
    if dest.is_none() {
        if let Some(h) = host {
            buf.extend_from_slice(h.as_bytes());
            buf.push(0x00);
        }
    }
    buf
}

pub struct Socks4Reply {
    pub granted: bool,
}

pub fn parse_socks4_reply(buf: &[u8]) -> Result<Option<Socks4Reply>> {
    if buf.len() < 8 {
        return Ok(None);
    }
    if buf[0] != 0x00 {
        return Err(anyhow!("malformed SOCKS4 reply"));
    }
    Ok(Some(Socks4Reply { granted: buf[1] == 0x5A }))
}

pub fn socks5_greeting(methods: &[AuthMethod]) -> Vec<u8> {
    let mut buf = vec![SOCKS5_VERSION, methods.len() as u8];
    buf.extend(methods.iter().map(|m| m.code()));
    buf
}

pub fn parse_socks5_method_selection(buf: &[u8]) -> Result<Option<AuthMethod>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[0] != SOCKS5_VERSION {
        return Err(anyhow!("unexpected SOCKS version in method selection"));
    }
    match buf[1] {
        0x00 => Ok(Some(AuthMethod::NoAuth)),
        0x02 => Ok(Some(AuthMethod::UserPass)),
        0xFF => Err(anyhow!("SOCKS5 server rejected all auth methods")),
        other => Err(anyhow!("unsupported SOCKS5 auth method selected: {other:#x}")),
    }
}

pub fn socks5_userpass_request(user: &str, pass: &str) -> Vec<u8> {
    let mut buf = vec![0x01, user.len() as u8];
    buf.extend_from_slice(user.as_bytes());
    buf.push(pass.len() as u8);
    buf.extend_from_slice(pass.as_bytes());
    buf
}

pub fn parse_socks5_userpass_reply(buf: &[u8]) -> Result<Option<bool>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    Ok(Some(buf[1] == 0x00))
}

#[derive(Debug, Clone)]
pub enum Socks5Address {
    V4(Ipv4Addr),
    Domain(String),
    V6(std::net::Ipv6Addr),
}

pub fn socks5_connect_request(addr: &Socks5Address, port: u16) -> Vec<u8> {
    let mut buf = vec![SOCKS5_VERSION, 0x01, 0x00];
    match addr {
        Socks5Address::V4(ip) => {
            buf.push(0x01);
            buf.extend_from_slice(&ip.octets());
        }
        Socks5Address::Domain(name) => {
            buf.push(0x03);
            buf.push(name.len() as u8);
            buf.extend_from_slice(name.as_bytes());
        }
        Socks5Address::V6(ip) => {
            buf.push(0x04);
            buf.extend_from_slice(&ip.octets());
        }
    }
    buf.extend_from_slice(&port.to_be_bytes());
    buf
}

pub struct Socks5ConnectReply {
    pub granted: bool,
    pub bytes_consumed: usize,
}

/// Length of a SOCKS5 CONNECT reply depends on the bound-address type
/// field, so this needs the whole header before it knows how much to
/// consume.
pub fn parse_socks5_connect_reply(buf: &[u8]) -> Result<Option<Socks5ConnectReply>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    if buf[0] != SOCKS5_VERSION {
        return Err(anyhow!("unexpected SOCKS version in connect reply"));
    }
    let granted = buf[1] == 0x00;
    let addr_len = match buf[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let len = *buf.get(4).ok_or_else(|| anyhow!("truncated domain length"))? as usize;
            if buf.len() < 5 + len + 2 {
                return Ok(None);
            }
            return Ok(Some(Socks5ConnectReply { granted, bytes_consumed: 5 + len + 2 }));
        }
        other => return Err(anyhow!("unsupported bound address type: {other:#x}")),
    };
    let total = 4 + addr_len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(Socks5ConnectReply { granted, bytes_consumed: total }))
}
