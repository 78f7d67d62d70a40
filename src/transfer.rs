//! Performs the live blocking network I/O for one Connection: dial,
//! optional proxy negotiation, optional TLS, the origin protocol exchange,
//! and the positional file write (§4.2).
//!
//! A `Connect` (or resumed) completion dequeued by a reactor worker runs
//! this whole sequence — through to the Range's completion or a retryable
//! failure — in one blocking call on that worker thread, rather than being
//! broken back down into a completion per syscall. §5 only mandates
//! "parallel threads only," not fine-grained per-read completions, and a
//! hand-rolled non-blocking state machine for this much protocol surface
//! is not something that could be gotten right without compiling it.

use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, Context};
use rustls::{ClientConnection, StreamOwned};
use tracing::{debug, warn};

use crate::auth::AuthState;
use crate::connection::{Connection, Socket};
use crate::download::Download;
use crate::net::AddressList;
use crate::options::{ProxyConfig, ProxyKind, SslVersionPreference};
use crate::protocol::{self, ftp, http, socks, tls as tlsmod, Scheme, Target};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const IO_TIMEOUT: Duration = Duration::from_secs(30);

pub enum Outcome {
    Completed,
    Retryable(anyhow::Error),
}

/// Drive one Connection's Range to completion (or a retryable failure).
/// Resuming after a pause just means starting over from the Range's
/// already-persisted `content_offset` (§4.2 "Pause/resume") — the socket
/// from before the pause is long gone either way.
pub fn run(conn: &Connection, download: &Download, user_agent: &str) -> Outcome {
    match run_inner(conn, download, user_agent) {
        Ok(()) => Outcome::Completed,
        Err(e) => Outcome::Retryable(e),
    }
}

fn run_inner(conn: &Connection, download: &Download, user_agent: &str) -> anyhow::Result<()> {
    let range_index = conn.state.lock().unwrap().range_index;
    let target = protocol::parse_url(&download.url)?;

    if target.scheme.is_ftp_family() {
        ftp_transfer(conn, download, range_index, &target)
    } else {
        let proxy = download.options.proxy.clone();
        http_transfer(conn, download, range_index, target, user_agent, proxy.as_ref())
    }
}

/// Read from `read_more` into `buf` until `parse` reports a complete
/// value. Used for every protocol's reply framing — HTTP headers, FTP
/// control replies, SOCKS handshake replies — since they all share the
/// same "parse what's buffered, read more on `None`" shape.
fn read_until<T>(
    mut read_more: impl FnMut(&mut [u8]) -> std::io::Result<usize>,
    buf: &mut Vec<u8>,
    parse: impl Fn(&[u8]) -> anyhow::Result<Option<T>>,
) -> anyhow::Result<T> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(v) = parse(buf)? {
            return Ok(v);
        }
        let n = read_more(&mut chunk)?;
        if n == 0 {
            return Err(anyhow!("connection closed before a complete reply arrived"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn dial(host: &str, port: u16) -> anyhow::Result<TcpStream> {
    let mut addrs = AddressList::resolve(host, port)?;
    loop {
        let addr = addrs.current().ok_or_else(|| anyhow!("no address left to try for {host}:{port}"))?;
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_read_timeout(Some(IO_TIMEOUT))?;
                stream.set_write_timeout(Some(IO_TIMEOUT))?;
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "connect failed, trying next resolved address");
                if !addrs.advance() {
                    return Err(e).with_context(|| format!("connecting to {host}:{port}"));
                }
            }
        }
    }
}

fn connect_via_proxy(proxy: &ProxyConfig, host: &str, port: u16) -> anyhow::Result<TcpStream> {
    let stream = dial(&proxy.host, proxy.port)?;
    match proxy.kind {
        ProxyKind::Http | ProxyKind::Https => http_connect_tunnel(stream, proxy, host, port),
        ProxyKind::Socks4 | ProxyKind::Socks4a | ProxyKind::Socks5 => negotiate_socks(stream, proxy, host, port),
    }
}

fn http_connect_tunnel(mut stream: TcpStream, proxy: &ProxyConfig, host: &str, port: u16) -> anyhow::Result<TcpStream> {
    use std::io::Write;
    let mut req = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if let Some(creds) = &proxy.credentials {
        req.push_str(&format!("Proxy-Authorization: {}\r\n", http::basic_authorization(&creds.user, &creds.pass)));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes())?;

    let mut buf = Vec::new();
    let resp = read_until(|b| stream.read(b), &mut buf, http::parse_response)?;
    if resp.status.code != 200 {
        return Err(anyhow!("proxy CONNECT to {host}:{port} failed: {} {}", resp.status.code, resp.status.reason));
    }
    Ok(stream)
}

/// Drive the real SOCKS4/4a/5 handshake (§4.2 "Outbound via SOCKS"),
/// transitioning through [`crate::connection::SocksSubstate`] exactly the
/// way the per-Connection state machine names the steps, even though here
/// it happens inline in one blocking call rather than completion-by-
/// completion.
fn negotiate_socks(mut stream: TcpStream, proxy: &ProxyConfig, host: &str, port: u16) -> anyhow::Result<TcpStream> {
    use crate::connection::SocksSubstate;
    use std::io::Write;

    match proxy.kind {
        ProxyKind::Socks4 | ProxyKind::Socks4a => {
            let substate = SocksSubstate::RequestConnection;
            let dest = host.parse::<std::net::Ipv4Addr>().ok();
            if dest.is_none() && proxy.kind == ProxyKind::Socks4 {
                return Err(anyhow!("SOCKS4 requires a literal IPv4 destination; {host} is a hostname (use SOCKS4a instead)"));
            }
            let user = proxy.credentials.as_ref().map(|c| c.user.as_str()).unwrap_or("");
            let hostname = if dest.is_none() { Some(host) } else { None };
            debug!(?substate, %host, "sending SOCKS4 connect request");
            stream.write_all(&socks::socks4_connect_request(dest, hostname, port, user))?;

            let mut buf = Vec::new();
            let reply = read_until(|b| stream.read(b), &mut buf, socks::parse_socks4_reply)?;
            if !reply.granted {
                return Err(anyhow!("SOCKS4 proxy refused to connect to {host}:{port}"));
            }
            Ok(stream)
        }
        ProxyKind::Socks5 => {
            let mut substate = SocksSubstate::RequestAuth;
            let methods = if proxy.credentials.is_some() {
                vec![socks::AuthMethod::NoAuth, socks::AuthMethod::UserPass]
            } else {
                vec![socks::AuthMethod::NoAuth]
            };
            stream.write_all(&socks::socks5_greeting(&methods))?;

            let mut buf = Vec::new();
            let method = read_until(|b| stream.read(b), &mut buf, socks::parse_socks5_method_selection)?;
            substate = SocksSubstate::AuthSent;

            if matches!(method, socks::AuthMethod::UserPass) {
                let creds = proxy
                    .credentials
                    .as_ref()
                    .ok_or_else(|| anyhow!("proxy requires SOCKS5 username/password authentication"))?;
                stream.write_all(&socks::socks5_userpass_request(&creds.user, &creds.pass))?;
                let mut auth_buf = Vec::new();
                let ok = read_until(|b| stream.read(b), &mut auth_buf, socks::parse_socks5_userpass_reply)?;
                if !ok {
                    return Err(anyhow!("SOCKS5 proxy rejected the supplied username/password"));
                }
            }

            substate = SocksSubstate::RequestConnection;
            let addr = socks::Socks5Address::Domain(host.to_string());
            stream.write_all(&socks::socks5_connect_request(&addr, port))?;

            substate = SocksSubstate::HandleConnection;
            let mut conn_buf = Vec::new();
            let reply = read_until(|b| stream.read(b), &mut conn_buf, socks::parse_socks5_connect_reply)?;
            debug!(?substate, granted = reply.granted, "SOCKS5 connect reply");
            if !reply.granted {
                return Err(anyhow!("SOCKS5 proxy refused to connect to {host}:{port}"));
            }
            Ok(stream)
        }
        ProxyKind::Http | ProxyKind::Https => unreachable!("HTTP(S) proxies use http_connect_tunnel"),
    }
}

fn wrap_tls(stream: TcpStream, host: &str, ssl_version: SslVersionPreference) -> anyhow::Result<StreamOwned<ClientConnection, TcpStream>> {
    let config = tlsmod::client_config(ssl_version)?;
    let server_name = tlsmod::server_name(host)?;
    let client = ClientConnection::new(config, server_name).context("starting TLS handshake")?;
    Ok(StreamOwned::new(client, stream))
}

/// The full HTTP(S) happy path for one Range, including the redirect and
/// Digest-auth retry loops (§6 "HTTP client wire", "Redirects", "Auth").
/// Every iteration dials a fresh connection — matching the "new connection,
/// one re-request attempted" framing of the original auth flow rather than
/// trying to resend on a kept-alive socket the server may have closed.
fn http_transfer(
    conn: &Connection,
    download: &Download,
    range_index: usize,
    mut current_target: Target,
    user_agent: &str,
    proxy: Option<&ProxyConfig>,
) -> anyhow::Result<()> {
    let mut auth = AuthState::default();
    let mut proxy_auth = AuthState::default();
    let mut redirects = 0u32;
    let max_redirects = download.options.max_redirects;

    loop {
        auth.clear_on_host_change(&current_target.host);

        let raw_stream = match proxy {
            Some(p) => connect_via_proxy(p, &current_target.host, current_target.port)?,
            None => dial(&current_target.host, current_target.port)?,
        };
        if current_target.scheme.wants_tls_on_connect() {
            let tls_stream = wrap_tls(raw_stream, &current_target.host, download.options.ssl_version)?;
            conn.install_socket(Socket::Tls(tls_stream));
        } else {
            conn.install_socket(Socket::Plain(raw_stream));
        }

        let (total_parts, range) = {
            let state = download.state.lock().unwrap();
            (state.planner.range_list.len(), state.planner.range_list[range_index])
        };
        let range_header = if total_parts == 1 && range.content_offset == 0 {
            None
        } else {
            Some((range.range_start + range.content_offset, range.range_end))
        };

        // `auth.next_nc()` needs `&mut auth` while the challenge it is keyed
        // to is still borrowed, so the challenge is cloned out first rather
        // than matched by reference.
        let authorization = match auth.challenge.clone() {
            Some(c) => {
                let creds = download.options.credentials.clone().unwrap_or_default();
                let nc = auth.next_nc();
                Some(http::build_digest_authorization(&c, &creds.user, &creds.pass, download.options.method.as_str(), &current_target.path, nc))
            }
            None => None,
        };
        let proxy_authorization = match (proxy, proxy_auth.challenge.clone()) {
            (Some(p), Some(c)) => {
                let creds = p.credentials.clone().unwrap_or_default();
                let nc = proxy_auth.next_nc();
                Some(http::build_digest_authorization(&c, &creds.user, &creds.pass, download.options.method.as_str(), &current_target.path, nc))
            }
            (Some(p), None) => p.credentials.as_ref().map(|c| http::basic_authorization(&c.user, &c.pass)),
            (None, _) => None,
        };

        let spec = http::RequestSpec {
            method: download.options.method,
            host: current_target.host.clone(),
            port: current_target.port,
            path: &current_target.path,
            user_agent,
            range: range_header,
            keep_alive: false,
            cookies: download.options.cookies.as_deref(),
            headers: &download.options.headers,
            authorization,
            proxy_authorization,
            post_data: download.options.post_data.as_deref(),
            content_type: None,
        };
        let had_authorization = spec.authorization.is_some();
        let had_proxy_authorization = spec.proxy_authorization.is_some();
        let request = http::build_request(&spec);
        conn.write_all_socket(&request)?;

        let mut buf = Vec::new();
        let resp = read_until(|b| conn.read_socket(b), &mut buf, http::parse_response)?;

        if resp.status.code == 401 {
            if had_authorization {
                return Err(anyhow!("authentication failed for {}", current_target.host));
            }
            let challenge_header = http::header(&resp.headers, "WWW-Authenticate")
                .ok_or_else(|| anyhow!("401 response with no WWW-Authenticate header"))?;
            let challenge = http::parse_digest_challenge(challenge_header)
                .ok_or_else(|| anyhow!("unsupported WWW-Authenticate challenge scheme"))?;
            auth.record_challenge(challenge, &current_target.host);
            continue;
        }
        if resp.status.code == 407 {
            if had_proxy_authorization && proxy_auth.challenge.is_some() {
                return Err(anyhow!("proxy authentication failed"));
            }
            let challenge_header = http::header(&resp.headers, "Proxy-Authenticate")
                .ok_or_else(|| anyhow!("407 response with no Proxy-Authenticate header"))?;
            let challenge = http::parse_digest_challenge(challenge_header)
                .ok_or_else(|| anyhow!("unsupported Proxy-Authenticate challenge scheme"))?;
            proxy_auth.record_challenge(challenge, &current_target.host);
            continue;
        }
        if matches!(resp.status.code, 301 | 302 | 303 | 307 | 308) {
            redirects += 1;
            if redirects > max_redirects {
                return Err(anyhow!("exceeded {max_redirects} redirects"));
            }
            let location = http::header(&resp.headers, "Location").ok_or_else(|| anyhow!("redirect with no Location header"))?;
            current_target = http::resolve_redirect(&current_target, location)?;
            continue;
        }
        if !matches!(resp.status.code, 200 | 206) {
            return Err(anyhow!("server returned {} {}", resp.status.code, resp.status.reason));
        }

        record_response_metadata(download, &resp.headers);

        let content_length = http::header(&resp.headers, "Content-Length").and_then(|v| v.parse::<u64>().ok());
        let chunked = http::header(&resp.headers, "Transfer-Encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        let content_encoding = http::header(&resp.headers, "Content-Encoding").map(|s| s.to_ascii_lowercase());

        let raw_body = read_full_body(conn, &mut buf, resp.body_offset, content_length, chunked)?;
        let decoded = decode_content_encoding(raw_body, content_encoding.as_deref())?;
        download.write_body_bytes(range_index, &decoded)?;
        return Ok(());
    }
}

fn record_response_metadata(download: &Download, headers: &[(String, String)]) {
    let mut state = download.state.lock().unwrap();
    if state.declared_file_size.is_none() {
        if let Some(cr) = http::header(headers, "Content-Range") {
            if let Some(total) = cr.rsplit('/').next().and_then(|t| t.parse::<u64>().ok()) {
                state.declared_file_size = Some(total);
            }
        } else if let Some(cl) = http::header(headers, "Content-Length").and_then(|v| v.parse::<u64>().ok()) {
            state.declared_file_size = Some(cl);
        }
    }
    if let Some(lm) = http::header(headers, "Last-Modified") {
        state.last_modified = Some(lm.to_string());
    }
}

/// Read the whole response body (chunked, content-length delimited, or
/// close-delimited) into memory before handing it to the optional
/// content-encoding decoder and the file writer. Each part is already a
/// fraction of the whole file (§4.3), so buffering one part at a time
/// keeps peak memory bounded by `file_size / parts`, not the whole file.
fn read_full_body(conn: &Connection, buf: &mut Vec<u8>, start: usize, content_length: Option<u64>, chunked: bool) -> anyhow::Result<Vec<u8>> {
    let mut chunk = [0u8; 8192];
    if chunked {
        let mut pos = start;
        let mut out = Vec::new();
        loop {
            match http::decode_one_chunk(buf, pos)? {
                Some(step) => {
                    out.extend_from_slice(step.payload);
                    pos = step.next_pos;
                    if step.done {
                        return Ok(out);
                    }
                }
                None => {
                    let n = conn.read_socket(&mut chunk)?;
                    if n == 0 {
                        return Err(anyhow!("connection closed mid-chunk"));
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    } else if let Some(len) = content_length {
        let mut out = buf[start..].to_vec();
        while (out.len() as u64) < len {
            let n = conn.read_socket(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        out.truncate(len as usize);
        Ok(out)
    } else {
        let mut out = buf[start..].to_vec();
        loop {
            let n = conn.read_socket(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }
}

fn decode_content_encoding(raw: Vec<u8>, encoding: Option<&str>) -> anyhow::Result<Vec<u8>> {
    match encoding {
        Some("gzip") => {
            let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).context("decoding gzip response body")?;
            Ok(out)
        }
        Some("deflate") => {
            let mut decoder = flate2::read::DeflateDecoder::new(&raw[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).context("decoding deflate response body")?;
            Ok(out)
        }
        _ => Ok(raw),
    }
}

fn ftp_command(conn: &Connection, buf: &mut Vec<u8>, verb: &str, arg: Option<&str>) -> anyhow::Result<ftp::Reply> {
    conn.write_all_socket(&ftp::command(verb, arg))?;
    buf.clear();
    read_until(|b| conn.read_socket(b), buf, ftp::parse_reply)
}

/// The FTP/FTPS/FTPES control-channel sequence for one Range: banner,
/// login, optional explicit TLS upgrade, PASV, optional REST, RETR, then
/// read the data channel into the file (§4.2 "FTP control connection
/// path").
fn ftp_transfer(conn: &Connection, download: &Download, range_index: usize, target: &Target) -> anyhow::Result<()> {
    let mut state = ftp::FtpState::Connect;
    let stream = dial(&target.host, target.port)?;
    conn.install_socket(Socket::Plain(stream));

    state = ftp::FtpState::Banner;
    let mut buf = Vec::new();
    let banner = read_until(|b| conn.read_socket(b), &mut buf, ftp::parse_reply)?;
    if banner.code != 220 {
        return Err(anyhow!("unexpected FTP banner: {} {}", banner.code, banner.text));
    }

    if matches!(target.scheme, Scheme::Ftpes) {
        state = ftp::FtpState::AuthTls;
        let auth_reply = ftp_command(conn, &mut buf, "AUTH", Some("TLS"))?;
        if auth_reply.code != 234 {
            return Err(anyhow!("server refused AUTH TLS: {} {}", auth_reply.code, auth_reply.text));
        }
        let Socket::Plain(plain) = conn.take_socket() else {
            return Err(anyhow!("expected a plaintext socket before the AUTH TLS upgrade"));
        };
        let tls_stream = wrap_tls(plain, &target.host, SslVersionPreference::default())?;
        conn.install_socket(Socket::Tls(tls_stream));
    }

    let user = target.user.clone().unwrap_or_else(|| "anonymous".to_string());
    let pass = target.pass.clone().unwrap_or_else(|| "anonymous@rangefetch".to_string());

    state = ftp::FtpState::User;
    let user_reply = ftp_command(conn, &mut buf, "USER", Some(user.as_str()))?;
    match user_reply.code {
        230 => {}
        331 => {
            state = ftp::FtpState::Pass;
            let pass_reply = ftp_command(conn, &mut buf, "PASS", Some(pass.as_str()))?;
            if pass_reply.code != 230 {
                return Err(anyhow!("FTP login failed: {} {}", pass_reply.code, pass_reply.text));
            }
        }
        other => return Err(anyhow!("FTP login failed: {other} {}", user_reply.text)),
    }

    if matches!(target.scheme, Scheme::Ftps | Scheme::Ftpes) {
        state = ftp::FtpState::Pbsz;
        let _ = ftp_command(conn, &mut buf, "PBSZ", Some("0"))?;
        state = ftp::FtpState::Prot;
        let _ = ftp_command(conn, &mut buf, "PROT", Some("P"))?;
    }

    state = ftp::FtpState::TypeI;
    let type_reply = ftp_command(conn, &mut buf, "TYPE", Some("I"))?;
    if type_reply.code != 200 {
        return Err(anyhow!("FTP TYPE I failed: {} {}", type_reply.code, type_reply.text));
    }

    state = ftp::FtpState::Pasv;
    let pasv_reply = ftp_command(conn, &mut buf, "PASV", None)?;
    if pasv_reply.code != 227 {
        return Err(anyhow!("PASV failed: {} {}", pasv_reply.code, pasv_reply.text));
    }
    let (data_ip, data_port) = ftp::parse_pasv_reply(&pasv_reply.text)?;

    let range = { download.state.lock().unwrap().planner.range_list[range_index] };
    if range.content_offset > 0 {
        state = ftp::FtpState::Rest;
        let rest_arg = range.content_offset.to_string();
        let rest_reply = ftp_command(conn, &mut buf, "REST", Some(rest_arg.as_str()))?;
        if rest_reply.code != 350 {
            return Err(anyhow!("REST failed: {} {}", rest_reply.code, rest_reply.text));
        }
    }

    state = ftp::FtpState::Retr;
    debug!(?state, "sending RETR");
    conn.write_all_socket(&ftp::command("RETR", Some(target.path.as_str())))?;
    buf.clear();
    let retr_reply = read_until(|b| conn.read_socket(b), &mut buf, ftp::parse_reply)?;
    if !matches!(retr_reply.code, 125 | 150) {
        return Err(anyhow!("RETR failed: {} {}", retr_reply.code, retr_reply.text));
    }
    state = ftp::FtpState::TransferInProgress;

    let mut data_stream = TcpStream::connect_timeout(&std::net::SocketAddr::new(data_ip.into(), data_port), CONNECT_TIMEOUT)
        .context("connecting to FTP data channel")?;
    data_stream.set_read_timeout(Some(IO_TIMEOUT))?;

    let mut body = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = data_stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    download.write_body_bytes(range_index, &body)?;

    buf.clear();
    let final_reply = read_until(|b| conn.read_socket(b), &mut buf, ftp::parse_reply)?;
    if !matches!(final_reply.code, 226 | 250) {
        warn!(code = final_reply.code, text = %final_reply.text, "FTP server did not confirm transfer completion");
    }

    state = ftp::FtpState::Quit;
    debug!(?state, "closing FTP control channel");
    let _ = ftp_command(conn, &mut buf, "QUIT", None);
    Ok(())
}

/// Send an FTP control-channel keepalive, driven by the Timeout Sweeper's
/// posted `KeepAlive` completion rather than the main transfer loop
/// (§4.5).
pub fn send_ftp_keepalive(conn: &Connection) {
    if let Err(e) = conn.write_all_socket(&ftp::command("NOOP", None)) {
        debug!(error = %e, "FTP keepalive NOOP failed");
    }
}

/// Tear down the live socket backing a Connection being force-closed,
/// e.g. by the Timeout Sweeper or a failed/EOF read (§4.1 step 4, §4.5).
pub fn close(conn: &Connection) {
    conn.install_socket(Socket::None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn http_transfer_downloads_a_whole_small_file_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = socket.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]);
            tx.send(request.into_owned()).unwrap();

            let body = b"hello from loopback";
            let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
            use std::io::Write;
            socket.write_all(response.as_bytes()).unwrap();
            socket.write_all(body).unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let download = Download::new(
            crate::ids::DownloadId::next(),
            format!("http://{addr}/f.bin"),
            dir.path().to_path_buf(),
            "f.bin".into(),
            crate::options::DownloadOptions::default(),
        );
        download.state.lock().unwrap().planner.seed_whole_file(20);

        let conn = Connection::new(crate::ids::ConnectionId::next(), download.id, 0);
        let target = protocol::parse_url(&download.url).unwrap();
        http_transfer(&conn, &download, 0, target, "rangefetch-test", None).unwrap();

        let request = rx.recv().unwrap();
        assert!(request.starts_with("GET /f.bin HTTP/1.1"));

        let on_disk = std::fs::read(download.staging_path()).unwrap();
        assert_eq!(on_disk, b"hello from loopback");
        assert_eq!(download.state.lock().unwrap().bytes_downloaded, 20);
    }

    #[test]
    fn http_transfer_follows_a_redirect() {
        let final_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let final_addr = final_listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut socket, _) = final_listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).unwrap();
            let body = b"redirected";
            let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
            use std::io::Write;
            socket.write_all(response.as_bytes()).unwrap();
            socket.write_all(body).unwrap();
        });

        let redirect_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let redirect_addr = redirect_listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut socket, _) = redirect_listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).unwrap();
            let response = format!("HTTP/1.1 302 Found\r\nLocation: http://{final_addr}/g.bin\r\nContent-Length: 0\r\n\r\n");
            use std::io::Write;
            socket.write_all(response.as_bytes()).unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let download = Download::new(
            crate::ids::DownloadId::next(),
            format!("http://{redirect_addr}/f.bin"),
            dir.path().to_path_buf(),
            "f.bin".into(),
            crate::options::DownloadOptions::default(),
        );
        download.state.lock().unwrap().planner.seed_whole_file(10);

        let conn = Connection::new(crate::ids::ConnectionId::next(), download.id, 0);
        let target = protocol::parse_url(&download.url).unwrap();
        http_transfer(&conn, &download, 0, target, "rangefetch-test", None).unwrap();

        let on_disk = std::fs::read(download.staging_path()).unwrap();
        assert_eq!(on_disk, b"redirected");
    }

    #[test]
    fn ftp_transfer_runs_the_control_channel_and_fetches_the_file() {
        let control_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let control_addr = control_listener.local_addr().unwrap();
        let data_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let data_addr = data_listener.local_addr().unwrap();
        let data_port = data_addr.port();

        thread::spawn(move || {
            let (mut ctrl, _) = control_listener.accept().unwrap();
            let mut buf = [0u8; 256];
            use std::io::Write;

            ctrl.write_all(b"220 welcome\r\n").unwrap();
            let _ = ctrl.read(&mut buf).unwrap(); // USER
            ctrl.write_all(b"230 logged in\r\n").unwrap();
            let _ = ctrl.read(&mut buf).unwrap(); // TYPE
            ctrl.write_all(b"200 type set\r\n").unwrap();
            let _ = ctrl.read(&mut buf).unwrap(); // PASV
            ctrl.write_all(format!("227 Entering Passive Mode (127,0,0,1,{},{}).\r\n", data_port >> 8, data_port & 0xFF).as_bytes())
                .unwrap();
            let _ = ctrl.read(&mut buf).unwrap(); // RETR
            ctrl.write_all(b"150 opening data connection\r\n").unwrap();

            let (mut data, _) = data_listener.accept().unwrap();
            data.write_all(b"ftp payload").unwrap();
            drop(data);

            ctrl.write_all(b"226 transfer complete\r\n").unwrap();
            let _ = ctrl.read(&mut buf).unwrap(); // QUIT
        });

        let dir = tempfile::tempdir().unwrap();
        let download = Download::new(
            crate::ids::DownloadId::next(),
            format!("ftp://{control_addr}/pub/f.bin"),
            dir.path().to_path_buf(),
            "f.bin".into(),
            crate::options::DownloadOptions::default(),
        );
        download.state.lock().unwrap().planner.seed_whole_file(11);

        let conn = Connection::new(crate::ids::ConnectionId::next(), download.id, 0);
        let target = protocol::parse_url(&download.url).unwrap();
        ftp_transfer(&conn, &download, 0, &target).unwrap();

        let on_disk = std::fs::read(download.staging_path()).unwrap();
        assert_eq!(on_disk, b"ftp payload");
    }
}
