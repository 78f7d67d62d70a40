//! Small formatting and parsing helpers with no better home.

use humansize::{FormatSizeOptions, SizeFormatter, DECIMAL};

/// Grounded in `turbo-downloader`'s `utils::bytes_to_human`.
pub fn bytes_to_human(bytes: u64) -> SizeFormatter<u64, FormatSizeOptions> {
    SizeFormatter::new(bytes, DECIMAL)
}

/// `Host` header / URL authority value for a bracketed IPv6 literal vs a
/// plain hostname or IPv4 literal.
pub fn format_host_header(host: &str, port: u16, default_port: u16) -> String {
    let host_part = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    if port == default_port {
        host_part
    } else {
        format!("{host_part}:{port}")
    }
}

/// Extract a filename from a `Content-Disposition` header value, falling
/// back to the last path segment of `url_path` when absent or unparsable.
pub fn filename_from_content_disposition(header: Option<&str>, url_path: &str) -> String {
    if let Some(h) = header {
        if let Some(name) = extract_disposition_filename(h) {
            return sanitize_filename(&name);
        }
    }
    let tail = url_path.rsplit('/').next().unwrap_or("download");
    let decoded = urlencoding_decode(tail);
    sanitize_filename(if decoded.is_empty() { "download" } else { &decoded })
}

fn extract_disposition_filename(header: &str) -> Option<String> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename*=") {
            let rest = rest.trim_start_matches("UTF-8''");
            return Some(urlencoding_decode(rest));
        }
        if let Some(rest) = part.strip_prefix("filename=") {
            return Some(rest.trim_matches('"').to_string());
        }
    }
    None
}

fn urlencoding_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hi = chars.next();
            let lo = chars.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                    out.push(byte as char);
                    continue;
                }
            }
            out.push('%');
        } else {
            out.push(c);
        }
    }
    out
}

/// Strip path separators and other characters unsafe for a bare filename
/// on common host filesystems.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}
