//! HTTP request framing and response parsing (§6 "HTTP client wire").

use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{anyhow, Context, Result};
use md5::{Digest, Md5};
use rand::Rng;

use crate::options::{DownloadOptions, Method};

pub struct RequestSpec<'a> {
    pub method: Method,
    pub host: String,
    pub port: u16,
    pub path: &'a str,
    pub user_agent: &'a str,
    pub range: Option<(u64, u64)>,
    pub keep_alive: bool,
    pub cookies: Option<&'a str>,
    pub headers: &'a HashMap<String, String>,
    pub authorization: Option<String>,
    pub proxy_authorization: Option<String>,
    pub post_data: Option<&'a [u8]>,
    pub content_type: Option<&'a str>,
}

/// Build a request line + headers, CRLF-terminated and ready to write to
/// the socket. `Range` is omitted for a single-part download or a first
/// probe request, per §6.
pub fn build_request(spec: &RequestSpec) -> Vec<u8> {
    let mut out = String::new();
    let host_header = crate::util::format_host_header(
        &spec.host,
        spec.port,
        if spec.port == 443 { 443 } else { 80 },
    );
    let _ = writeln!(out, "{} {} HTTP/1.1\r", spec.method.as_str(), spec.path);
    let _ = writeln!(out, "Host: {host_header}\r");
    let _ = writeln!(out, "User-Agent: {}\r", spec.user_agent);
    let _ = writeln!(out, "Accept: */*\r");
    let _ = writeln!(out, "Connection: {}\r", if spec.keep_alive { "keep-alive" } else { "close" });
    if let Some((start, end)) = spec.range {
        let _ = writeln!(out, "Range: bytes={start}-{end}\r");
    }
    if let Some(cookies) = spec.cookies {
        let _ = writeln!(out, "Cookie: {cookies}\r");
    }
    for (k, v) in spec.headers {
        let _ = writeln!(out, "{k}: {v}\r");
    }
    if let Some(auth) = &spec.authorization {
        let _ = writeln!(out, "Authorization: {auth}\r");
    }
    if let Some(auth) = &spec.proxy_authorization {
        let _ = writeln!(out, "Proxy-Authorization: {auth}\r");
    }
    if let Some(data) = spec.post_data {
        let ctype = spec.content_type.unwrap_or("application/x-www-form-urlencoded");
        let _ = writeln!(out, "Content-Type: {ctype}\r");
        let _ = writeln!(out, "Content-Length: {}\r", data.len());
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    if let Some(data) = spec.post_data {
        bytes.extend_from_slice(data);
    }
    bytes
}

pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub reason: String,
}

pub struct Response {
    pub status: StatusLine,
    pub headers: Vec<(String, String)>,
    /// Byte offset in the source buffer where the body starts.
    pub body_offset: usize,
}

/// Case-insensitive header lookup honoring line folding already merged by
/// `parse_headers`.
pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse a status line + header block out of `buf`. Returns `None` if the
/// terminating blank line hasn't arrived yet (caller should read more).
pub fn parse_response(buf: &[u8]) -> Result<Option<Response>> {
    let Some(header_end) = find_header_terminator(buf) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&buf[..header_end]).context("response headers are not UTF-8")?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().ok_or_else(|| anyhow!("empty response"))?;
    let status = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(Some(Response {
        status,
        headers,
        body_offset: header_end + 4,
    }))
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_line(line: &str) -> Result<StatusLine> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(|| anyhow!("missing HTTP version"))?.to_string();
    let code: u16 = parts
        .next()
        .ok_or_else(|| anyhow!("missing status code"))?
        .parse()
        .context("invalid status code")?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok(StatusLine { version, code, reason })
}

/// Decode one `Transfer-Encoding: chunked` framing step starting at
/// `buf[pos..]`. Returns the decoded payload slice and the new position,
/// or `None` if a complete chunk header/body hasn't arrived yet. The
/// terminating `"0\r\n\r\n"` decodes to an empty payload with `done: true`.
pub struct ChunkStep<'a> {
    pub payload: &'a [u8],
    pub next_pos: usize,
    pub done: bool,
}

pub fn decode_one_chunk(buf: &[u8], pos: usize) -> Result<Option<ChunkStep<'_>>> {
    let rest = &buf[pos..];
    let Some(line_end) = rest.windows(2).position(|w| w == b"\r\n") else {
        return Ok(None);
    };
    let size_line = std::str::from_utf8(&rest[..line_end]).context("chunk size is not UTF-8")?;
    let size_str = size_line.split(';').next().unwrap_or("").trim();
    let size = usize::from_str_radix(size_str, 16).context("invalid chunk size")?;

    let body_start = line_end + 2;
    if size == 0 {
        if rest.len() < body_start + 2 {
            return Ok(None);
        }
        return Ok(Some(ChunkStep {
            payload: &rest[body_start..body_start],
            next_pos: pos + body_start + 2,
            done: true,
        }));
    }

    let needed = body_start + size + 2;
    if rest.len() < needed {
        return Ok(None);
    }
    Ok(Some(ChunkStep {
        payload: &rest[body_start..body_start + size],
        next_pos: pos + needed,
        done: false,
    }))
}

/// Parsed `WWW-Authenticate: Digest ...` / `Proxy-Authenticate: Digest ...`
/// challenge (§6 "Auth").
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

pub fn parse_digest_challenge(header_value: &str) -> Option<DigestChallenge> {
    let rest = header_value.strip_prefix("Digest ")?;
    let mut fields: HashMap<String, String> = HashMap::new();
    for part in split_digest_params(rest) {
        if let Some((k, v)) = part.split_once('=') {
            fields.insert(k.trim().to_string(), v.trim().trim_matches('"').to_string());
        }
    }
    Some(DigestChallenge {
        realm: fields.get("realm")?.clone(),
        nonce: fields.get("nonce")?.clone(),
        qop: fields.get("qop").cloned(),
        opaque: fields.get("opaque").cloned(),
    })
}

fn split_digest_params(s: &str) -> Vec<&str> {
    // Commas inside quoted values must not split a field; good enough for
    // the handful of fields servers actually send.
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(s[start..].trim());
    out
}

fn md5_hex(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    digest.iter().fold(String::with_capacity(32), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// `Authorization` / `Proxy-Authorization` header value for one `qop=auth`
/// Digest exchange (§6 "Auth"): `HA1=MD5(user:realm:pass)`,
/// `HA2=MD5(method:uri)`, `response=MD5(HA1:nonce:nc:cnonce:qop:HA2)`,
/// random cnonce, one re-request attempted. `nc` is the caller's nonce
/// count for this challenge (starts at 1), not the raw MD5 input — it gets
/// zero-padded to the 8 hex digits the wire format requires.
pub fn build_digest_authorization(
    challenge: &DigestChallenge,
    user: &str,
    pass: &str,
    method: &str,
    uri: &str,
    nc: u32,
) -> String {
    let ha1 = md5_hex(&format!("{user}:{}:{pass}", challenge.realm));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    let nc = format!("{nc:08x}");
    let cnonce: String = {
        let mut rng = rand::thread_rng();
        (0..16).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
    };
    let qop = challenge.qop.as_deref().unwrap_or("auth");
    let response = md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}", challenge.nonce));

    let mut out = format!(
        "Digest username=\"{user}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", qop={qop}, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\"",
        challenge.realm, challenge.nonce
    );
    if let Some(opaque) = &challenge.opaque {
        let _ = write!(out, ", opaque=\"{opaque}\"");
    }
    out
}

pub fn basic_authorization(user: &str, pass: &str) -> String {
    use base64::Engine;
    let raw = format!("{user}:{pass}");
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
}

/// Resolve a `Location` header against the request it answered, honoring
/// both absolute and relative forms (§6 "Redirects").
pub fn resolve_redirect(base: &crate::protocol::Target, location: &str) -> Result<crate::protocol::Target> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return crate::protocol::parse_url(location);
    }
    let scheme = if base.scheme == crate::protocol::Scheme::Https { "https" } else { "http" };
    let base_url = format!("{scheme}://{}:{}{}", base.host, base.port, base.path);
    let joined = url::Url::parse(&base_url)?.join(location)?;
    crate::protocol::parse_url(joined.as_str())
}

pub fn options_to_request_headers(opts: &DownloadOptions) -> &HashMap<String, String> {
    &opts.headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ranged_get_request() {
        let headers = HashMap::new();
        let spec = RequestSpec {
            method: Method::Get,
            host: "example.com".into(),
            port: 80,
            path: "/f.bin",
            user_agent: "rangefetch/0.1.0",
            range: Some((100, 199)),
            keep_alive: true,
            cookies: None,
            headers: &headers,
            authorization: None,
            proxy_authorization: None,
            post_data: None,
            content_type: None,
        };
        let req = String::from_utf8(build_request(&spec)).unwrap();
        assert!(req.starts_with("GET /f.bin HTTP/1.1\r\n"));
        assert!(req.contains("Range: bytes=100-199\r\n"));
        assert!(req.contains("Host: example.com\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parses_response_status_and_headers() {
        let raw = b"HTTP/1.1 206 Partial Content\r\nContent-Length: 10\r\nContent-Range: bytes 0-9/100\r\n\r\nbodybytes.";
        let resp = parse_response(raw).unwrap().unwrap();
        assert_eq!(resp.status.code, 206);
        assert_eq!(header(&resp.headers, "content-length"), Some("10"));
        assert_eq!(&raw[resp.body_offset..], b"bodybytes.");
    }

    #[test]
    fn incomplete_headers_returns_none() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10";
        assert!(parse_response(raw).unwrap().is_none());
    }

    #[test]
    fn decodes_two_chunks_then_terminator() {
        let buf = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let step1 = decode_one_chunk(buf, 0).unwrap().unwrap();
        assert_eq!(step1.payload, b"Wiki");
        assert!(!step1.done);
        let step2 = decode_one_chunk(buf, step1.next_pos).unwrap().unwrap();
        assert_eq!(step2.payload, b"pedia");
        let step3 = decode_one_chunk(buf, step2.next_pos).unwrap().unwrap();
        assert!(step3.done);
    }

    #[test]
    fn parses_digest_challenge() {
        let header = r#"Digest realm="test", nonce="abc123", qop="auth""#;
        let c = parse_digest_challenge(header).unwrap();
        assert_eq!(c.realm, "test");
        assert_eq!(c.nonce, "abc123");
        assert_eq!(c.qop.as_deref(), Some("auth"));
    }

    #[test]
    fn digest_response_is_32_hex_chars() {
        let challenge = DigestChallenge {
            realm: "r".into(),
            nonce: "n".into(),
            qop: Some("auth".into()),
            opaque: None,
        };
        let auth = build_digest_authorization(&challenge, "u", "p", "GET", "/f", 1);
        let response_field = auth.split("response=\"").nth(1).unwrap();
        let response = &response_field[..32];
        assert!(response.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn relative_redirect_resolves_against_base() {
        let base = crate::protocol::Target {
            scheme: crate::protocol::Scheme::Http,
            host: "example.com".into(),
            port: 80,
            path: "/dir/file".into(),
            user: None,
            pass: None,
        };
        let t = resolve_redirect(&base, "other").unwrap();
        assert_eq!(t.path, "/dir/other");
    }
}
