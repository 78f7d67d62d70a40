//! Download-history records, credential obfuscation, and the settings
//! file format (§6 "Persisted state").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::options::Credentials;
use crate::range::Range;

/// Reversible, non-cryptographic byte cipher for stored credentials
/// (§6: "not cryptographic; it is an obfuscation, not a secret"). XORs
/// each byte against a fixed key stream advanced by a running counter, so
/// repeated bytes in the plaintext don't repeat in the ciphertext.
const OBFUSCATION_KEY: &[u8] = b"rangefetch-credential-store-v1";

pub fn obfuscate(plain: &str) -> Vec<u8> {
    plain
        .as_bytes()
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ OBFUSCATION_KEY[i % OBFUSCATION_KEY.len()] ^ (i as u8))
        .collect()
}

pub fn deobfuscate(cipher: &[u8]) -> anyhow::Result<String> {
    let plain: Vec<u8> = cipher
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ OBFUSCATION_KEY[i % OBFUSCATION_KEY.len()] ^ (i as u8))
        .collect();
    Ok(String::from_utf8(plain)?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscatedCredentials {
    pub user: Vec<u8>,
    pub pass: Vec<u8>,
}

impl ObfuscatedCredentials {
    pub fn from_plain(c: &Credentials) -> Self {
        Self { user: obfuscate(&c.user), pass: obfuscate(&c.pass) }
    }

    pub fn to_plain(&self) -> anyhow::Result<Credentials> {
        Ok(Credentials { user: deobfuscate(&self.user)?, pass: deobfuscate(&self.pass)? })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeRecord {
    pub range_start: u64,
    pub range_end: u64,
    pub content_length: Option<u64>,
    pub content_offset: u64,
    pub file_write_offset: u64,
}

impl From<&Range> for RangeRecord {
    fn from(r: &Range) -> Self {
        Self {
            range_start: r.range_start,
            range_end: r.range_end,
            content_length: r.content_length,
            content_offset: r.content_offset,
            file_write_offset: r.file_write_offset,
        }
    }
}

impl From<&RangeRecord> for Range {
    fn from(r: &RangeRecord) -> Self {
        Range {
            range_start: r.range_start,
            range_end: r.range_end,
            content_length: r.content_length,
            content_offset: r.content_offset,
            file_write_offset: r.file_write_offset,
        }
    }
}

/// One Download's persisted history entry (§6). Serialized as JSON via
/// `serde_json` — the spec's "trivial record I/O" framing explicitly
/// excludes designing a bespoke format here, unlike the settings file
/// below which the spec does specify a wire format for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub url: String,
    pub target_dir: String,
    pub filename: String,
    pub add_time_unix: i64,
    pub bytes_downloaded: u64,
    pub declared_file_size: Option<u64>,
    pub parts: usize,
    pub parts_limit: usize,
    pub status: String,
    pub cookies: Option<String>,
    pub headers: HashMap<String, String>,
    pub post_data: Option<Vec<u8>>,
    pub credentials: Option<ObfuscatedCredentials>,
    pub last_modified: Option<String>,
    pub ranges: Vec<RangeRecord>,
}

pub fn save_history(records: &[DownloadRecord]) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

pub fn load_history(json: &str) -> anyhow::Result<Vec<DownloadRecord>> {
    Ok(serde_json::from_str(json)?)
}

/// Settings file wire format (§6): a fixed magic header, a block of
/// fixed-width fields, then length-prefixed strings.
const SETTINGS_MAGIC: &[u8; 8] = b"RFSET001";

pub struct Settings {
    pub max_downloads: u32,
    pub default_parts: u32,
    pub timeout_secs: u32,
    pub staging_dir: String,
    pub user_agent: String,
}

pub fn encode_settings(s: &Settings) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(SETTINGS_MAGIC);
    buf.extend_from_slice(&s.max_downloads.to_le_bytes());
    buf.extend_from_slice(&s.default_parts.to_le_bytes());
    buf.extend_from_slice(&s.timeout_secs.to_le_bytes());
    write_length_prefixed(&mut buf, &s.staging_dir);
    write_length_prefixed(&mut buf, &s.user_agent);
    buf
}

pub fn decode_settings(buf: &[u8]) -> anyhow::Result<Settings> {
    if buf.len() < SETTINGS_MAGIC.len() || &buf[..SETTINGS_MAGIC.len()] != SETTINGS_MAGIC {
        return Err(anyhow::anyhow!("bad settings file magic"));
    }
    let mut pos = SETTINGS_MAGIC.len();
    let max_downloads = read_u32(buf, &mut pos)?;
    let default_parts = read_u32(buf, &mut pos)?;
    let timeout_secs = read_u32(buf, &mut pos)?;
    let staging_dir = read_length_prefixed(buf, &mut pos)?;
    let user_agent = read_length_prefixed(buf, &mut pos)?;
    Ok(Settings { max_downloads, default_parts, timeout_secs, staging_dir, user_agent })
}

fn write_length_prefixed(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_u32(buf: &[u8], pos: &mut usize) -> anyhow::Result<u32> {
    let end = *pos + 4;
    let bytes: [u8; 4] = buf.get(*pos..end).ok_or_else(|| anyhow::anyhow!("truncated settings file"))?.try_into()?;
    *pos = end;
    Ok(u32::from_le_bytes(bytes))
}

fn read_length_prefixed(buf: &[u8], pos: &mut usize) -> anyhow::Result<String> {
    let len = read_u32(buf, pos)? as usize;
    let end = *pos + len;
    let bytes = buf.get(*pos..end).ok_or_else(|| anyhow::anyhow!("truncated settings string"))?;
    *pos = end;
    Ok(String::from_utf8(bytes.to_vec())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obfuscation_round_trips() {
        let plain = "s3cr3t-password";
        let cipher = obfuscate(plain);
        assert_ne!(cipher, plain.as_bytes());
        assert_eq!(deobfuscate(&cipher).unwrap(), plain);
    }

    #[test]
    fn obfuscated_credentials_round_trip() {
        let creds = Credentials { user: "alice".into(), pass: "hunter2".into() };
        let obf = ObfuscatedCredentials::from_plain(&creds);
        let back = obf.to_plain().unwrap();
        assert_eq!(back.user, creds.user);
        assert_eq!(back.pass, creds.pass);
    }

    #[test]
    fn settings_round_trip_through_wire_format() {
        let s = Settings {
            max_downloads: 4,
            default_parts: 8,
            timeout_secs: 60,
            staging_dir: "/tmp/staging".into(),
            user_agent: "rangefetch/0.1.0".into(),
        };
        let encoded = encode_settings(&s);
        assert_eq!(&encoded[..8], SETTINGS_MAGIC);
        let decoded = decode_settings(&encoded).unwrap();
        assert_eq!(decoded.max_downloads, 4);
        assert_eq!(decoded.staging_dir, "/tmp/staging");
        assert_eq!(decoded.user_agent, "rangefetch/0.1.0");
    }

    #[test]
    fn decode_rejects_bad_magic() {
        assert!(decode_settings(b"NOTMAGIC").is_err());
    }

    #[test]
    fn history_round_trips_through_json() {
        let record = DownloadRecord {
            url: "http://example.com/f".into(),
            target_dir: "/tmp".into(),
            filename: "f".into(),
            add_time_unix: 0,
            bytes_downloaded: 10,
            declared_file_size: Some(100),
            parts: 4,
            parts_limit: 4,
            status: "Downloading".into(),
            cookies: None,
            headers: HashMap::new(),
            post_data: None,
            credentials: None,
            last_modified: None,
            ranges: vec![],
        };
        let json = save_history(&[record]).unwrap();
        let back = load_history(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].bytes_downloaded, 10);
    }
}
