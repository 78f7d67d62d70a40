//! Prompt queues (§4.6): file-exists, file-too-large, remote-modified.
//!
//! Each is a single-worker queue that hands a request to the host UI and
//! waits for a decision; the decision resumes the blocked Connection with
//! `ResumeGetContent` (carrying the pre-recorded byte count) or aborts it
//! with `Close`. The host-UI side of this is outside this crate's scope
//! (§1 exclusions); what lives here is the queue, the option sets, and
//! their effects on Connection/Download state.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::connection::{Cleanup, Op};
use crate::ids::{ConnectionId, DownloadId};
use crate::status::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileExistsChoice {
    Rename,
    RenameAll,
    Overwrite,
    OverwriteAll,
    Skip,
    SkipAll,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTooLargeChoice {
    Yes,
    YesAll,
    No,
    NoAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteModifiedChoice {
    Continue,
    ContinueAll,
    Restart,
    RestartAll,
    Skip,
    SkipAll,
    Fail,
}

pub enum PromptRequest {
    FileExists { download_id: DownloadId, connection_id: ConnectionId, path: PathBuf },
    FileTooLarge { download_id: DownloadId, connection_id: ConnectionId, declared_size: u64 },
    RemoteModified { download_id: DownloadId, connection_id: ConnectionId, new_last_modified: String },
}

/// Find the lowest integer suffix `" (N)"` that collides with none of
/// `taken` (§4.6 "rename finds the lowest integer suffix... that does not
/// collide with the union of existing files on disk, active Downloads,
/// queued Downloads").
pub fn next_available_name(path: &Path, taken: &HashSet<PathBuf>) -> PathBuf {
    if !path.exists() && !taken.contains(path) {
        return path.to_path_buf();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file").to_string();
    let ext = path.extension().and_then(|s| s.to_str()).map(|s| s.to_string());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    let mut n = 1u32;
    loop {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() && !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Default)]
struct QueueState {
    file_exists: VecDeque<PromptRequest>,
    file_too_large: VecDeque<PromptRequest>,
    remote_modified: VecDeque<PromptRequest>,
    apply_to_all_file_exists: Option<FileExistsChoice>,
    apply_to_all_too_large: Option<FileTooLargeChoice>,
    apply_to_all_remote_modified: Option<RemoteModifiedChoice>,
}

pub struct PromptQueues {
    state: Mutex<QueueState>,
}

impl PromptQueues {
    pub fn new() -> Self {
        Self { state: Mutex::new(QueueState::default()) }
    }

    pub fn push_file_exists(&self, download_id: DownloadId, connection_id: ConnectionId, path: PathBuf) {
        self.state.lock().unwrap().file_exists.push_back(PromptRequest::FileExists { download_id, connection_id, path });
    }

    pub fn push_file_too_large(&self, download_id: DownloadId, connection_id: ConnectionId, declared_size: u64) {
        self.state.lock().unwrap().file_too_large.push_back(PromptRequest::FileTooLarge { download_id, connection_id, declared_size });
    }

    pub fn push_remote_modified(&self, download_id: DownloadId, connection_id: ConnectionId, new_last_modified: String) {
        self.state.lock().unwrap().remote_modified.push_back(PromptRequest::RemoteModified { download_id, connection_id, new_last_modified });
    }

    pub fn apply_file_exists(
        &self,
        registry: &crate::registry::Registry,
        choice: FileExistsChoice,
        taken: &HashSet<PathBuf>,
    ) {
        let Some(req) = self.state.lock().unwrap().file_exists.pop_front() else { return };
        let PromptRequest::FileExists { download_id, connection_id, path } = req else { return };
        if matches!(choice, FileExistsChoice::RenameAll | FileExistsChoice::OverwriteAll | FileExistsChoice::SkipAll) {
            self.state.lock().unwrap().apply_to_all_file_exists = Some(choice);
        }
        match choice {
            FileExistsChoice::Rename | FileExistsChoice::RenameAll => {
                let renamed = next_available_name(&path, taken);
                if let (Some(download), Some(conn)) = (registry.get_download(download_id), registry.get_connection(connection_id)) {
                    resume_connection(&conn);
                    let _ = (download, renamed);
                }
            }
            FileExistsChoice::Overwrite | FileExistsChoice::OverwriteAll => {
                if let Some(conn) = registry.get_connection(connection_id) {
                    resume_connection(&conn);
                }
            }
            FileExistsChoice::Skip | FileExistsChoice::SkipAll | FileExistsChoice::Fail => {
                mark_skipped_and_close(registry, download_id, connection_id);
            }
        }
    }

    pub fn apply_file_too_large(&self, registry: &crate::registry::Registry, choice: FileTooLargeChoice) {
        let Some(req) = self.state.lock().unwrap().file_too_large.pop_front() else { return };
        let PromptRequest::FileTooLarge { download_id, connection_id, .. } = req else { return };
        if matches!(choice, FileTooLargeChoice::YesAll | FileTooLargeChoice::NoAll) {
            self.state.lock().unwrap().apply_to_all_too_large = Some(choice);
        }
        match choice {
            FileTooLargeChoice::Yes | FileTooLargeChoice::YesAll => {
                if let Some(conn) = registry.get_connection(connection_id) {
                    resume_connection(&conn);
                }
            }
            FileTooLargeChoice::No | FileTooLargeChoice::NoAll => {
                if let Some(download) = registry.get_download(download_id) {
                    let mut st = download.state.lock().unwrap();
                    st.planner = crate::range::RangePlanner::new();
                    st.status.transition_to(State::Skipped);
                }
                close_connection(registry, connection_id);
            }
        }
    }

    pub fn apply_remote_modified(&self, registry: &crate::registry::Registry, choice: RemoteModifiedChoice) {
        let Some(req) = self.state.lock().unwrap().remote_modified.pop_front() else { return };
        let PromptRequest::RemoteModified { download_id, connection_id, .. } = req else { return };
        if matches!(choice, RemoteModifiedChoice::ContinueAll | RemoteModifiedChoice::RestartAll | RemoteModifiedChoice::SkipAll) {
            self.state.lock().unwrap().apply_to_all_remote_modified = Some(choice);
        }
        match choice {
            RemoteModifiedChoice::Continue | RemoteModifiedChoice::ContinueAll => {
                if let Some(conn) = registry.get_connection(connection_id) {
                    resume_connection(&conn);
                }
            }
            RemoteModifiedChoice::Restart | RemoteModifiedChoice::RestartAll => {
                if let Some(download) = registry.get_download(download_id) {
                    download.state.lock().unwrap().status.transition_to(State::Restart);
                }
                close_connection(registry, connection_id);
                // Re-planning from zero happens when cleanup finishes
                // draining this Connection's pending operations, mirroring
                // §4.6 ("on cleanup the Download is re-planned from zero").
            }
            RemoteModifiedChoice::Skip | RemoteModifiedChoice::SkipAll | RemoteModifiedChoice::Fail => {
                mark_skipped_and_close(registry, download_id, connection_id);
            }
        }
    }
}

impl Default for PromptQueues {
    fn default() -> Self {
        Self::new()
    }
}

fn resume_connection(conn: &crate::connection::Connection) {
    let mut state = conn.state.lock().unwrap();
    let recorded_bytes = state.read_buf.len() as u64;
    state.current_op = Op::ResumeGetContent { recorded_bytes };
}

fn close_connection(registry: &crate::registry::Registry, connection_id: ConnectionId) {
    if let Some(conn) = registry.get_connection(connection_id) {
        let mut state = conn.state.lock().unwrap();
        state.cleanup = Cleanup::ForceRequested;
        state.current_op = Op::Close;
    }
}

fn mark_skipped_and_close(registry: &crate::registry::Registry, download_id: DownloadId, connection_id: ConnectionId) {
    if let Some(download) = registry.get_download(download_id) {
        download.state.lock().unwrap().status.transition_to(State::Skipped);
    }
    close_connection(registry, connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_available_name_skips_taken_names() {
        let taken: HashSet<PathBuf> = [PathBuf::from("/tmp/f (1).bin")].into_iter().collect();
        let path = PathBuf::from("/tmp/does-not-exist-abcxyz.bin");
        assert_eq!(next_available_name(&path, &HashSet::new()), path);

        let collide = PathBuf::from("/tmp/f.bin");
        let mut taken_with_base = taken.clone();
        taken_with_base.insert(collide.clone());
        let result = next_available_name(&collide, &taken_with_base);
        assert_eq!(result, PathBuf::from("/tmp/f (2).bin"));
    }
}
