//! The per-job object (§3 "Download").
//!
//! Mirrors `turbo-downloader`'s pattern of one big struct behind a mutex
//! (`InternalProgress` there, `DownloadState` here) plus a thin outer
//! handle (`TurboDownloader` there, `Download` here) that owns identity and
//! immutable configuration and hands out `Arc` clones of the shared state.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::ids::{ConnectionId, DownloadId};
use crate::options::DownloadOptions;
use crate::persistence::{DownloadRecord, ObfuscatedCredentials, RangeRecord};
use crate::progress::ProgressHistory;
use crate::range::RangePlanner;
use crate::status::{State, Status};

/// Mutable fields serialized under the Download's own mutex (§5: a
/// Connection takes its own mutex first, then this one — never the
/// reverse).
pub struct DownloadState {
    pub status: Status,
    pub bytes_downloaded: u64,
    pub declared_file_size: Option<u64>,
    pub last_modified: Option<String>,
    pub retries: u32,
    pub start_time: Option<Instant>,
    pub file: Option<File>,
    pub planner: RangePlanner,
    /// Connections currently serving this Download ("parts").
    pub parts_list: HashSet<ConnectionId>,
    pub history: ProgressHistory,
}

impl DownloadState {
    fn new(added_stopped: bool) -> Self {
        Self {
            status: if added_stopped {
                Status::new(State::Connecting).also_paused()
            } else {
                Status::default()
            },
            bytes_downloaded: 0,
            declared_file_size: None,
            last_modified: None,
            retries: 0,
            start_time: None,
            file: None,
            planner: RangePlanner::new(),
            parts_list: HashSet::new(),
            history: ProgressHistory::new(),
        }
    }

    pub fn active_parts(&self) -> usize {
        self.parts_list.len()
    }
}

/// Identity and policy are immutable for the life of the Download, so they
/// live outside the mutex — same split `turbo-downloader`'s `url` /
/// `options` fields make against its mutex-guarded progress context.
pub struct Download {
    pub id: DownloadId,
    pub url: String,
    pub target_dir: PathBuf,
    pub filename: String,
    pub add_time: Instant,
    added_at_unix: i64,
    pub options: DownloadOptions,
    pub state: Mutex<DownloadState>,
}

impl Download {
    pub fn new(id: DownloadId, url: String, target_dir: PathBuf, filename: String, options: DownloadOptions) -> Self {
        let added_stopped = options.added_stopped;
        let added_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            id,
            url,
            target_dir,
            filename,
            add_time: Instant::now(),
            added_at_unix,
            options,
            state: Mutex::new(DownloadState::new(added_stopped)),
        }
    }

    pub fn target_path(&self) -> PathBuf {
        self.target_dir.join(&self.filename)
    }

    /// The file this Download's parts actually write into while in
    /// progress; renamed to [`target_path`](Self::target_path) once all
    /// ranges complete (§4.2, Move Queue).
    pub fn staging_path(&self) -> PathBuf {
        self.target_dir.join(format!("{}.part", self.filename))
    }

    fn open_file_if_needed(state: &mut DownloadState, path: &PathBuf) -> std::io::Result<()> {
        if state.file.is_none() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            state.file = Some(OpenOptions::new().create(true).write(true).read(true).open(path)?);
        }
        Ok(())
    }

    /// Write `data` at `range_index`'s current file-write offset, then
    /// advance that Range's `file_write_offset`/`content_offset` and the
    /// Download's `bytes_downloaded`/history. The advance only happens
    /// after every byte is confirmed written (§4.2 ordering rule) so a
    /// write failure never lets progress bookkeeping outrun the file.
    #[cfg(unix)]
    pub fn write_body_bytes(&self, range_index: usize, data: &[u8]) -> std::io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let path = self.staging_path();
        let mut state = self.state.lock().unwrap();
        Self::open_file_if_needed(&mut state, &path)?;
        let file = state.file.as_ref().expect("file opened above");

        let mut offset = state.planner.range_list[range_index].file_write_offset;
        let mut written = 0usize;
        while written < data.len() {
            let n = file.write_at(&data[written..], offset)?;
            if n == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "write_at wrote zero bytes"));
            }
            written += n;
            offset += n as u64;
        }

        let range = &mut state.planner.range_list[range_index];
        range.file_write_offset = offset;
        range.content_offset += data.len() as u64;
        state.bytes_downloaded += data.len() as u64;
        let total = state.bytes_downloaded;
        state.history.add_bytes(total);
        Ok(())
    }

    /// Run the planner against the current options. Called on submit,
    /// re-activation, and download-retry (§4.4 start/retry rules).
    pub fn replan(&self) {
        let mut st = self.state.lock().unwrap();
        let parts = self.options.parts;
        st.planner.plan(parts);
    }

    pub fn is_terminal(&self) -> bool {
        self.state.lock().unwrap().status.is_terminal()
    }

    /// Snapshot this Download's current state into a persistable record
    /// (§6 "Persisted state"). Fallible because it is a public API surface
    /// (SPEC_FULL.md "Error handling"), even though nothing in the current
    /// body can actually fail — future callers that add validation here
    /// don't need to change the signature.
    pub fn persist(&self) -> Result<DownloadRecord> {
        let state = self.state.lock().unwrap();
        Ok(DownloadRecord {
            url: self.url.clone(),
            target_dir: self.target_dir.to_string_lossy().into_owned(),
            filename: self.filename.clone(),
            add_time_unix: self.added_at_unix,
            bytes_downloaded: state.bytes_downloaded,
            declared_file_size: state.declared_file_size,
            parts: self.options.parts,
            parts_limit: self.options.parts_limit,
            status: format!("{:?}", state.status.state),
            cookies: self.options.cookies.clone(),
            headers: self.options.headers.clone(),
            post_data: self.options.post_data.clone(),
            credentials: self.options.credentials.as_ref().map(ObfuscatedCredentials::from_plain),
            last_modified: state.last_modified.clone(),
            ranges: state.planner.range_list.iter().map(RangeRecord::from).collect(),
        })
    }
}

impl Status {
    pub(crate) fn also_paused(mut self) -> Self {
        self.paused = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_download_is_not_terminal() {
        let d = Download::new(
            DownloadId::next(),
            "http://example.com/f".into(),
            PathBuf::from("/tmp"),
            "f".into(),
            DownloadOptions::default(),
        );
        assert!(!d.is_terminal());
    }

    #[test]
    fn added_stopped_option_starts_paused() {
        let mut opts = DownloadOptions::default();
        opts.added_stopped = true;
        let d = Download::new(
            DownloadId::next(),
            "http://example.com/f".into(),
            PathBuf::from("/tmp"),
            "f".into(),
            opts,
        );
        assert!(d.state.lock().unwrap().status.paused);
    }

    #[test]
    fn write_body_bytes_advances_offsets_and_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let d = Download::new(
            DownloadId::next(),
            "http://example.com/f".into(),
            dir.path().to_path_buf(),
            "f.bin".into(),
            DownloadOptions::default(),
        );
        {
            let mut state = d.state.lock().unwrap();
            state.planner.seed_whole_file(10);
        }

        d.write_body_bytes(0, b"hello").unwrap();
        {
            let state = d.state.lock().unwrap();
            assert_eq!(state.bytes_downloaded, 5);
            assert_eq!(state.planner.range_list[0].content_offset, 5);
            assert_eq!(state.planner.range_list[0].file_write_offset, 5);
        }

        d.write_body_bytes(0, b"world").unwrap();
        let on_disk = std::fs::read(d.staging_path()).unwrap();
        assert_eq!(on_disk, b"helloworld");
    }

    #[test]
    fn persist_snapshots_progress_and_obfuscates_credentials() {
        let mut opts = DownloadOptions::default();
        opts.credentials = Some(crate::options::Credentials { user: "alice".into(), pass: "secret".into() });
        let d = Download::new(
            DownloadId::next(),
            "http://example.com/f".into(),
            PathBuf::from("/tmp"),
            "f".into(),
            opts,
        );
        d.state.lock().unwrap().bytes_downloaded = 42;

        let record = d.persist().unwrap();
        assert_eq!(record.bytes_downloaded, 42);
        assert_eq!(record.filename, "f");
        let creds = record.credentials.unwrap();
        assert_ne!(creds.user, b"alice");
    }
}
