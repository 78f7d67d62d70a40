//! Global scheduler/queue (§4.4) and its control surface.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::connection::Op;
use crate::download::Download;
use crate::error::{EngineError, Result};
use crate::ids::{ConnectionId, DownloadId};
use crate::options::{DownloadOptions, EngineOptions};
use crate::protocol;
use crate::registry::Registry;
use crate::reactor::Reactor;
use crate::status::State;

struct SchedulerState {
    active_downloads: Vec<DownloadId>,
    download_queue: VecDeque<DownloadId>,
    total_downloading: usize,
}

/// Global active-downloads/queue state plus the control surface
/// (`add, start, pause, stop, resume, remove, restart`) from §4.4.
pub struct Scheduler {
    registry: Arc<Registry>,
    reactor: Arc<Reactor>,
    options: EngineOptions,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(registry: Arc<Registry>, reactor: Arc<Reactor>, options: EngineOptions) -> Self {
        Self {
            registry,
            reactor,
            options,
            state: Mutex::new(SchedulerState {
                active_downloads: Vec::new(),
                download_queue: VecDeque::new(),
                total_downloading: 0,
            }),
        }
    }

    /// Intake: create the Download and run the start rule (§4.4 "Start
    /// rule").
    pub fn add(&self, url: String, target_dir: PathBuf, filename: String, options: DownloadOptions) -> Result<DownloadId> {
        protocol::parse_url(&url).map_err(|_| EngineError::UnsupportedScheme(url.clone()))?;

        let id = DownloadId::next();
        let added_stopped = options.added_stopped;
        let download = Arc::new(Download::new(id, url, target_dir, filename, options));
        self.registry.insert_download(download.clone());
        download.replan();
        if added_stopped {
            let mut st = self.state.lock().unwrap();
            st.download_queue.push_back(id);
            return Ok(id);
        }
        self.start_or_queue(&download);
        Ok(id)
    }

    fn start_or_queue(&self, download: &Arc<Download>) {
        let mut st = self.state.lock().unwrap();
        if st.total_downloading < self.options.max_downloads {
            st.total_downloading += 1;
            st.active_downloads.push(download.id);
            drop(st);
            self.spawn_connections_for(download);
        } else {
            st.download_queue.push_back(download.id);
        }
    }

    fn spawn_connections_for(&self, download: &Arc<Download>) {
        let wanted = {
            let state = download.state.lock().unwrap();
            let usable: Vec<usize> = state
                .planner
                .queued_ranges()
                .map(|(i, _)| i)
                .collect();
            usable.into_iter().take(download.options.parts_limit).collect::<Vec<_>>()
        };
        for range_index in wanted {
            self.create_connection(download, range_index);
        }
    }

    fn create_connection(&self, download: &Arc<Download>, range_index: usize) {
        let conn_id = ConnectionId::next();
        let conn = Arc::new(crate::connection::Connection::new(conn_id, download.id, range_index));
        let is_ftp_control = protocol::parse_url(&download.url).map(|t| t.scheme.is_ftp_family()).unwrap_or(false);
        conn.state.lock().unwrap().is_ftp_control = is_ftp_control;
        conn.begin_operation();
        {
            let mut state = download.state.lock().unwrap();
            state.parts_list.insert(conn_id);
            state.planner.advance_cursor_past(range_index);
        }
        self.registry.insert_connection(conn);
        info!(download = %download.id, connection = %conn_id, range_index, "connection created");
        self.reactor.post(crate::reactor::Completion {
            connection_id: conn_id,
            op: Op::Connect,
            result: Ok(0),
        });
    }

    fn get_download_or_err(&self, id: DownloadId) -> Result<Arc<Download>> {
        self.registry.get_download(id).ok_or(EngineError::UnknownDownload(id))
    }

    pub fn pause(&self, id: DownloadId) -> Result<()> {
        let download = self.get_download_or_err(id)?;
        let mut st = download.state.lock().unwrap();
        st.status.paused = true;
        Ok(())
    }

    pub fn resume(&self, id: DownloadId) -> Result<()> {
        let download = self.get_download_or_err(id)?;
        {
            let mut st = download.state.lock().unwrap();
            st.status.paused = false;
        }
        // Resuming posts a synthetic completion carrying the previously
        // recorded byte count (§4.2 "Pause/resume").
        for conn in self.registry.connections_for_download(id) {
            let recorded_bytes = {
                let mut cs = conn.state.lock().unwrap();
                let recorded = cs.read_buf.len() as u64;
                cs.current_op = Op::ResumeGetContent { recorded_bytes: recorded };
                recorded
            };
            conn.begin_operation();
            self.reactor.post(crate::reactor::Completion {
                connection_id: conn.id,
                op: Op::ResumeGetContent { recorded_bytes },
                result: Ok(0),
            });
        }
        Ok(())
    }

    pub fn stop(&self, id: DownloadId) -> Result<()> {
        let download = self.get_download_or_err(id)?;
        {
            let mut st = download.state.lock().unwrap();
            st.status.transition_to(State::Stopped);
        }
        for conn in self.registry.connections_for_download(id) {
            let mut cs = conn.state.lock().unwrap();
            cs.cleanup = crate::connection::Cleanup::ForceRequested;
        }
        Ok(())
    }

    pub fn restart(&self, id: DownloadId) -> Result<()> {
        let download = self.get_download_or_err(id)?;
        {
            let mut st = download.state.lock().unwrap();
            st.status = crate::status::Status::new(State::Restart);
            st.retries = 0;
        }
        download.replan();
        self.start_or_queue(&download);
        Ok(())
    }

    pub fn remove(&self, id: DownloadId) -> Result<()> {
        self.stop(id)?;
        for conn in self.registry.connections_for_download(id) {
            self.registry.remove_connection(conn.id);
        }
        self.registry.remove_download(id);
        let mut st = self.state.lock().unwrap();
        st.active_downloads.retain(|d| *d != id);
        st.download_queue.retain(|d| *d != id);
        Ok(())
    }

    pub fn user_agent(&self) -> &str {
        &self.options.user_agent
    }

    /// A live part dropped out of re-arming because its Download is
    /// paused/queued (§4.1 step 5). No scheduler action needed beyond
    /// bookkeeping; resume re-posts explicitly.
    pub fn on_part_stalled(&self, _download_id: DownloadId, _connection_id: ConnectionId) {}

    /// A Connection finished (successfully or not). Apply the retry rules
    /// from §4.4 and, if the Download just went terminal, run the
    /// completion rule.
    pub fn on_connection_finished(&self, download_id: DownloadId, connection_id: ConnectionId, _last_op: Op, succeeded: bool) {
        let Some(download) = self.registry.get_download(download_id) else { return };
        self.registry.remove_connection(connection_id);

        let mut become_terminal = None;
        {
            let mut state = download.state.lock().unwrap();
            state.parts_list.remove(&connection_id);

            if !succeeded && state.retries < download.options.retry_downloads_count {
                state.retries += 1;
            } else if state.planner.all_complete() {
                state.status.transition_to(State::Completed);
                become_terminal = Some(State::Completed);
            } else if state.active_parts() == 0 {
                let next_status = if matches!(state.status.state, State::TimedOut) {
                    State::TimedOut
                } else {
                    State::Stopped
                };
                state.status.transition_to(next_status);
                become_terminal = Some(next_status);
            }
        }

        if let Some(status) = become_terminal {
            info!(download = %download_id, ?status, "download reached terminal status");
            self.on_download_terminal(download_id);
        } else {
            // Part retry or a queued range replacing this one; spin up
            // the next piece of work for this download if it has room.
            self.spawn_connections_for(&download);
        }
    }

    fn on_download_terminal(&self, id: DownloadId) {
        let mut st = self.state.lock().unwrap();
        st.active_downloads.retain(|d| *d != id);
        if st.total_downloading > 0 {
            st.total_downloading -= 1;
        }
        self.start_queued_item(&mut st);
    }

    fn start_queued_item(&self, st: &mut SchedulerState) {
        while st.total_downloading < self.options.max_downloads {
            let Some(next_id) = st.download_queue.pop_front() else { break };
            let Some(download) = self.registry.get_download(next_id) else { continue };
            st.total_downloading += 1;
            st.active_downloads.push(next_id);
            self.spawn_connections_for(&download);
        }
    }

    pub fn total_downloading(&self) -> usize {
        self.state.lock().unwrap().total_downloading
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().unwrap().download_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_scheduler(max_downloads: usize) -> Scheduler {
        let registry = Arc::new(Registry::new());
        let reactor = Arc::new(Reactor::new());
        let mut options = EngineOptions::default();
        options.max_downloads = max_downloads;
        Scheduler::new(registry, reactor, options)
    }

    #[test]
    fn submitting_under_capacity_starts_immediately() {
        let sched = new_scheduler(4);
        sched.add("http://example.com/f".into(), PathBuf::from("/tmp"), "f".into(), DownloadOptions::default()).unwrap();
        assert_eq!(sched.total_downloading(), 1);
        assert_eq!(sched.queued_count(), 0);
    }

    #[test]
    fn submitting_over_capacity_queues() {
        let sched = new_scheduler(1);
        sched.add("http://example.com/a".into(), PathBuf::from("/tmp"), "a".into(), DownloadOptions::default()).unwrap();
        sched.add("http://example.com/b".into(), PathBuf::from("/tmp"), "b".into(), DownloadOptions::default()).unwrap();
        assert_eq!(sched.total_downloading(), 1);
        assert_eq!(sched.queued_count(), 1);
    }

    #[test]
    fn added_stopped_download_is_queued_not_started() {
        let sched = new_scheduler(4);
        let mut opts = DownloadOptions::default();
        opts.added_stopped = true;
        sched.add("http://example.com/a".into(), PathBuf::from("/tmp"), "a".into(), opts).unwrap();
        assert_eq!(sched.total_downloading(), 0);
        assert_eq!(sched.queued_count(), 1);
    }

    #[test]
    fn completion_rule_starts_the_next_queued_download() {
        let sched = new_scheduler(1);
        let a = sched.add("http://example.com/a".into(), PathBuf::from("/tmp"), "a".into(), DownloadOptions::default()).unwrap();
        sched.add("http://example.com/b".into(), PathBuf::from("/tmp"), "b".into(), DownloadOptions::default()).unwrap();
        assert_eq!(sched.queued_count(), 1);

        if let Some(download) = sched.registry.get_download(a) {
            let mut state = download.state.lock().unwrap();
            state.planner.seed_whole_file(0);
            state.planner.range_list[0].content_offset = state.planner.range_list[0].len();
        }
        sched.on_download_terminal(a);
        assert_eq!(sched.queued_count(), 0);
        assert_eq!(sched.total_downloading(), 1);
    }
}
