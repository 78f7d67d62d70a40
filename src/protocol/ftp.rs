//! FTP/FTPS/FTPES control-channel framing (§6 "FTP wire", §4.2 "FTP
//! control connection path").
//!
//! Grounded in the `url`-based scheme handling seen across the pack's FTP
//! clients (e.g. `crane-core`'s `protocol::ftp`), adapted to this engine's
//! synchronous, buffer-in/buffer-out parsing style rather than an async
//! socket wrapper.

use anyhow::{anyhow, Context, Result};

/// Where the FTP control state machine currently is (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpState {
    Connect,
    Banner,
    User,
    Pass,
    AuthTls,
    Pbsz,
    Prot,
    TypeI,
    Size,
    Mdtm,
    Pasv,
    Rest,
    Retr,
    TransferInProgress,
    Quit,
}

pub fn command(verb: &str, arg: Option<&str>) -> Vec<u8> {
    match arg {
        Some(a) => format!("{verb} {a}\r\n").into_bytes(),
        None => format!("{verb}\r\n").into_bytes(),
    }
}

pub struct Reply {
    pub code: u16,
    pub text: String,
    /// Whether this is the final line of a multi-line reply.
    pub complete: bool,
}

/// Parse one FTP reply out of `buf`. Multi-line replies use
/// `"xyz-"` continuation markers and terminate on a line starting with
/// `"xyz "` carrying the same code (§6). Returns `None` if the reply
/// hasn't fully arrived.
pub fn parse_reply(buf: &[u8]) -> Result<Option<Reply>> {
    let Some(text) = std::str::from_utf8(buf).ok() else {
        return Ok(None);
    };
    if !text.contains("\r\n") {
        return Ok(None);
    }
    let mut lines = text.split("\r\n").filter(|l| !l.is_empty());
    let first = match lines.next() {
        Some(l) => l,
        None => return Ok(None),
    };
    if first.len() < 4 {
        return Ok(None);
    }
    let code: u16 = first[..3].parse().context("invalid FTP reply code")?;
    let marker = first.as_bytes()[3];

    if marker == b' ' {
        return Ok(Some(Reply { code, text: first[4..].to_string(), complete: true }));
    }
    if marker != b'-' {
        return Err(anyhow!("malformed FTP reply: {first}"));
    }

    let prefix = format!("{code} ");
    let mut body = vec![first[4..].to_string()];
    for line in lines {
        if line.starts_with(&prefix) {
            body.push(line[prefix.len()..].to_string());
            return Ok(Some(Reply { code, text: body.join("\n"), complete: true }));
        }
        body.push(line.to_string());
    }
    Ok(None)
}

/// Parse a `PASV` (or `EPSV`) reply's `(h1,h2,h3,h4,p1,p2)` tuple into a
/// data-connection address.
pub fn parse_pasv_reply(text: &str) -> Result<(std::net::Ipv4Addr, u16)> {
    let start = text.find('(').ok_or_else(|| anyhow!("PASV reply missing '('"))?;
    let end = text.find(')').ok_or_else(|| anyhow!("PASV reply missing ')'"))?;
    let nums: Vec<u8> = text[start + 1..end]
        .split(',')
        .map(|p| p.trim().parse())
        .collect::<std::result::Result<_, _>>()
        .context("invalid PASV octets")?;
    if nums.len() != 6 {
        return Err(anyhow!("PASV reply did not have 6 octets"));
    }
    let ip = std::net::Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = (nums[4] as u16) << 8 | nums[5] as u16;
    Ok((ip, port))
}

/// Build the `PORT` command argument for active mode: the engine's own
/// listening address encoded the same way a PASV reply is.
pub fn port_command_arg(addr: std::net::Ipv4Addr, port: u16) -> String {
    let octets = addr.octets();
    format!(
        "{},{},{},{},{},{}",
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        port >> 8,
        port & 0xFF
    )
}

/// `213 <yyyymmddhhmmss>` MDTM reply payload parsed into an RFC3339
/// timestamp comparable against a persisted `Last-Modified` value.
pub fn parse_mdtm_timestamp(text: &str) -> Option<String> {
    let t = text.trim();
    if t.len() < 14 {
        return None;
    }
    let (y, rest) = t.split_at(4);
    let (mo, rest) = rest.split_at(2);
    let (d, rest) = rest.split_at(2);
    let (h, rest) = rest.split_at(2);
    let (mi, s) = rest.split_at(2);
    let s = &s[..2.min(s.len())];
    Some(format!("{y}-{mo}-{d}T{h}:{mi}:{s}Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_reply() {
        let r = parse_reply(b"230 Login successful.\r\n").unwrap().unwrap();
        assert_eq!(r.code, 230);
        assert!(r.complete);
    }

    #[test]
    fn parses_multi_line_reply() {
        let raw = b"211-Features:\r\n PASV\r\n REST STREAM\r\n211 End\r\n";
        let r = parse_reply(raw).unwrap().unwrap();
        assert_eq!(r.code, 211);
        assert!(r.text.contains("PASV"));
    }

    #[test]
    fn incomplete_multiline_reply_returns_none() {
        let raw = b"211-Features:\r\n PASV\r\n";
        assert!(parse_reply(raw).unwrap().is_none());
    }

    #[test]
    fn parses_pasv_address() {
        let (ip, port) = parse_pasv_reply("227 Entering Passive Mode (192,168,1,1,200,10).").unwrap();
        assert_eq!(ip, std::net::Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(port, 200 * 256 + 10);
    }

    #[test]
    fn port_command_round_trips_pasv_encoding() {
        let addr = std::net::Ipv4Addr::new(10, 0, 0, 5);
        let arg = port_command_arg(addr, 51200);
        let (ip, port) = parse_pasv_reply(&format!("227 ({arg}).")).unwrap();
        assert_eq!(ip, addr);
        assert_eq!(port, 51200);
    }

    #[test]
    fn mdtm_timestamp_parses_into_iso_like_string() {
        let ts = parse_mdtm_timestamp("20240102030405").unwrap();
        assert_eq!(ts, "2024-01-02T03:04:05Z");
    }
}
