//! Move Queue (§4.6): relocates completed files from the staging
//! directory to their final destination, one job at a time.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use crate::ids::DownloadId;
use crate::prompt::next_available_name;

pub struct MoveJob {
    pub download_id: DownloadId,
    pub staged_path: PathBuf,
    pub final_path: PathBuf,
    pub overwrite: bool,
}

pub struct MoveQueue {
    queue: Mutex<VecDeque<MoveJob>>,
    busy: Arc<AtomicBool>,
}

impl MoveQueue {
    pub fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), busy: Arc::new(AtomicBool::new(false)) }
    }

    pub fn push(&self, job: MoveJob) {
        self.queue.lock().unwrap().push_back(job);
    }

    pub fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::SeqCst) && self.queue.lock().unwrap().is_empty()
    }

    /// Process jobs one at a time until the queue drains; intended to run
    /// on the move queue's single worker thread.
    pub fn drain(&self, taken: &HashSet<PathBuf>) {
        loop {
            let job = self.queue.lock().unwrap().pop_front();
            let Some(job) = job else { break };
            self.busy.store(true, Ordering::SeqCst);
            if let Err(err) = self.move_one(job, taken) {
                error!(%err, "move queue job failed");
            }
        }
        self.busy.store(false, Ordering::SeqCst);
    }

    fn move_one(&self, job: MoveJob, taken: &HashSet<PathBuf>) -> std::io::Result<()> {
        let dest = if job.overwrite || !job.final_path.exists() {
            job.final_path.clone()
        } else {
            next_available_name(&job.final_path, taken)
        };
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::rename(&job.staged_path, &dest) {
            Ok(()) => {
                info!(download = %job.download_id, dest = %dest.display(), "moved completed file");
                Ok(())
            }
            // Staging and final directories may live on different
            // filesystems, where rename(2) always fails; fall back to a
            // copy-then-remove.
            Err(_) => {
                std::fs::copy(&job.staged_path, &dest)?;
                std::fs::remove_file(&job.staged_path)?;
                info!(download = %job.download_id, dest = %dest.display(), "moved completed file (copied across filesystems)");
                Ok(())
            }
        }
    }
}

impl Default for MoveQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn drain_moves_staged_file_to_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staging.part");
        let finalp = dir.path().join("final.bin");
        std::fs::File::create(&staged).unwrap().write_all(b"hello").unwrap();

        let mq = MoveQueue::new();
        mq.push(MoveJob { download_id: DownloadId::next(), staged_path: staged.clone(), final_path: finalp.clone(), overwrite: false });
        mq.drain(&HashSet::new());

        assert!(!staged.exists());
        assert_eq!(std::fs::read(&finalp).unwrap(), b"hello");
        assert!(mq.is_idle());
    }

    #[test]
    fn collision_without_overwrite_renames() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staging.part");
        let finalp = dir.path().join("final.bin");
        std::fs::write(&staged, b"new").unwrap();
        std::fs::write(&finalp, b"existing").unwrap();

        let mq = MoveQueue::new();
        mq.push(MoveJob { download_id: DownloadId::next(), staged_path: staged, final_path: finalp.clone(), overwrite: false });
        mq.drain(&HashSet::new());

        assert_eq!(std::fs::read(&finalp).unwrap(), b"existing");
        let renamed = dir.path().join("final (1).bin");
        assert_eq!(std::fs::read(&renamed).unwrap(), b"new");
    }
}
