//! A multi-protocol, multi-part range-parallel download engine.
//!
//! See `SPEC_FULL.md` at the repository root for the full module
//! breakdown. The short version: a [`Scheduler`] owns global
//! active/queued state and talks to a [`reactor::Reactor`] worker pool
//! that drives each [`connection::Connection`]'s state machine to
//! completion against its owning [`download::Download`].

pub mod auth;
pub mod connection;
pub mod download;
pub mod error;
pub mod ids;
pub mod move_queue;
pub mod net;
pub mod options;
pub mod persistence;
pub mod progress;
pub mod prompt;
pub mod protocol;
pub mod range;
pub mod reactor;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod timeout;
pub mod transfer;
pub mod util;

use std::path::PathBuf;
use std::sync::Arc;

pub use error::{EngineError, Result};
pub use ids::{ConnectionId, DownloadId};
pub use options::{DownloadOptions, EngineOptions};
pub use progress::DownloadProgress;

/// Top-level handle tying the Registry, Reactor, Scheduler, Sweeper and
/// queues together. Constructing one spawns the reactor's worker pool and
/// the Timeout Sweeper thread; dropping the returned handles does not
/// join them — call [`Engine::shutdown`] first.
pub struct Engine {
    registry: Arc<registry::Registry>,
    reactor: Arc<reactor::Reactor>,
    scheduler: Arc<scheduler::Scheduler>,
    sweeper: Arc<timeout::Sweeper>,
    move_queue: Arc<move_queue::MoveQueue>,
    prompts: Arc<prompt::PromptQueues>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let registry = Arc::new(registry::Registry::new());
        let reactor = Arc::new(reactor::Reactor::new());
        let scheduler = Arc::new(scheduler::Scheduler::new(registry.clone(), reactor.clone(), options.clone()));
        let sweeper = Arc::new(timeout::Sweeper::new());

        reactor.spawn_workers(options.reactor_threads, registry.clone(), scheduler.clone());
        sweeper.spawn(registry.clone(), reactor.clone(), options);

        Self {
            registry,
            reactor,
            scheduler,
            sweeper,
            move_queue: Arc::new(move_queue::MoveQueue::new()),
            prompts: Arc::new(prompt::PromptQueues::new()),
        }
    }

    pub fn add(&self, url: impl Into<String>, target_dir: PathBuf, filename: impl Into<String>, options: DownloadOptions) -> Result<DownloadId> {
        self.scheduler.add(url.into(), target_dir, filename.into(), options)
    }

    pub fn pause(&self, id: DownloadId) -> Result<()> {
        self.scheduler.pause(id)
    }

    pub fn resume(&self, id: DownloadId) -> Result<()> {
        self.scheduler.resume(id)
    }

    pub fn stop(&self, id: DownloadId) -> Result<()> {
        self.scheduler.stop(id)
    }

    pub fn restart(&self, id: DownloadId) -> Result<()> {
        self.scheduler.restart(id)
    }

    pub fn remove(&self, id: DownloadId) -> Result<()> {
        self.scheduler.remove(id)
    }

    pub fn progress(&self, id: DownloadId) -> Option<DownloadProgress> {
        let download = self.registry.get_download(id)?;
        let state = download.state.lock().unwrap();
        Some(progress::build_snapshot(
            id,
            &download.url,
            &download.filename,
            state.status,
            state.bytes_downloaded,
            state.declared_file_size,
            state.active_parts(),
            state.history.get_speed(),
        ))
    }

    pub fn prompts(&self) -> &prompt::PromptQueues {
        &self.prompts
    }

    pub fn move_queue(&self) -> &move_queue::MoveQueue {
        &self.move_queue
    }

    pub fn shutdown(&self) {
        self.reactor.signal_shutdown();
        self.sweeper.shutdown();
    }
}
