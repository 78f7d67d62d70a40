//! Per-download policy knobs and engine-wide configuration.
//!
//! `DownloadOptions` is the spiritual descendant of `turbo-downloader`'s
//! `TurboDownloaderOptions`: a plain `Clone`able struct with a
//! `Default` impl that derives one field from another, handed by value into
//! worker threads. `EngineOptions` plays the same role one level up, for
//! things that are not per-job (worker pool size, default timeouts).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

/// TLS version preference. The source ORs protocol version flags
/// cumulatively from this index; we preserve that "this version and above"
/// semantics per the open question in §9 rather than inventing an
/// "exactly this version" pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SslVersionPreference {
    Sslv2 = 0,
    Sslv3 = 1,
    Tls10 = 2,
    Tls11 = 3,
    Tls12 = 4,
}

impl Default for SslVersionPreference {
    fn default() -> Self {
        // rustls only ever negotiates TLS 1.2+, so anything at or below
        // that floor collapses to the same cumulative-OR behavior.
        SslVersionPreference::Tls12
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.pass.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Https,
    Socks4,
    Socks4a,
    Socks5,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Desired number of range-parallel parts.
    pub parts: usize,
    /// Soft cap on simultaneously active parts for this download.
    pub parts_limit: usize,
    /// Per-download speed limit in bytes/sec, if any.
    pub speed_limit: Option<u64>,
    pub ssl_version: SslVersionPreference,
    pub method: Method,
    pub cookies: Option<String>,
    pub headers: HashMap<String, String>,
    pub post_data: Option<Vec<u8>>,
    pub credentials: Option<Credentials>,
    pub proxy: Option<ProxyConfig>,
    pub simulate: bool,
    pub override_prompts: bool,
    pub added_stopped: bool,
    pub max_redirects: u32,
    pub retry_parts_count: u32,
    pub retry_downloads_count: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        let parts = 4;
        Self {
            parts,
            // A soft cap equal to the desired part count is the natural
            // default: the planner otherwise queues work it cannot start.
            parts_limit: parts,
            speed_limit: None,
            ssl_version: SslVersionPreference::default(),
            method: Method::Get,
            cookies: None,
            headers: HashMap::new(),
            post_data: None,
            credentials: None,
            proxy: None,
            simulate: false,
            override_prompts: false,
            added_stopped: false,
            max_redirects: 8,
            retry_parts_count: 5,
            retry_downloads_count: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Fixed-size worker pool backing the reactor.
    pub reactor_threads: usize,
    pub max_downloads: usize,
    /// Seconds of inactivity before the Timeout Sweeper force-closes a
    /// Connection. Zero means "never".
    pub timeout_secs: u64,
    pub sweeper_interval: Duration,
    pub ftp_keepalive_interval: Duration,
    pub staging_dir: PathBuf,
    pub user_agent: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let reactor_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .clamp(2, 16);
        Self {
            reactor_threads,
            max_downloads: 4,
            timeout_secs: 60,
            sweeper_interval: Duration::from_secs(1),
            ftp_keepalive_interval: Duration::from_secs(30),
            staging_dir: std::env::temp_dir().join("rangefetch-staging"),
            user_agent: format!("rangefetch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parts_limit_matches_parts() {
        let opts = DownloadOptions::default();
        assert_eq!(opts.parts, opts.parts_limit);
    }

    #[test]
    fn reactor_threads_has_a_floor() {
        let opts = EngineOptions::default();
        assert!(opts.reactor_threads >= 2);
    }
}
