//! The I/O Reactor: a fixed worker pool draining a completion queue (§4.1).
//!
//! There is no completion-port primitive on this target, so the
//! proactor shape is approximated the way a portable Rust port of one
//! normally is: a bounded pool of OS threads each blocking on
//! `crossbeam_channel::Receiver::recv`, performing the actual blocking
//! socket/file call inline, then posting the result back onto the same
//! queue as a `Completion` for the next dispatch step. This keeps the
//! "completion carries the owning Connection + operation tag + byte
//! count, and the per-completion contract runs on a worker thread, never
//! in interrupt/signal context" shape from §4.1 and §5 intact.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::connection::{Cleanup, Op};
use crate::ids::ConnectionId;
use crate::registry::Registry;
use crate::scheduler::Scheduler;

/// One finished asynchronous operation, as described in §4.1: "the owning
/// Connection, the operation tag (`current_op`), and the transferred byte
/// count."
pub struct Completion {
    pub connection_id: ConnectionId,
    pub op: Op,
    pub result: std::io::Result<usize>,
}

#[derive(Clone)]
pub struct Reactor {
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver, shutdown: Arc::new(AtomicBool::new(false)) }
    }

    pub fn post(&self, completion: Completion) {
        let _ = self.sender.send(completion);
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake every blocked worker so it observes the shutdown flag.
        for _ in 0..64 {
            let _ = self.sender.send(Completion {
                connection_id: ConnectionId::next(),
                op: Op::Close,
                result: Ok(0),
            });
        }
    }

    /// Spawn the fixed worker pool. Each thread loops: dequeue, run the
    /// seven-step completion contract from §4.1, dispatch.
    pub fn spawn_workers(&self, threads: usize, registry: Arc<Registry>, scheduler: Arc<Scheduler>) {
        for worker_id in 0..threads.max(1) {
            let receiver = self.receiver.clone();
            let reactor = self.clone();
            let registry = registry.clone();
            let scheduler = scheduler.clone();
            std::thread::Builder::new()
                .name(format!("rangefetch-reactor-{worker_id}"))
                .spawn(move || reactor.worker_loop(receiver, registry, scheduler))
                .expect("spawning reactor worker thread");
        }
    }

    fn worker_loop(&self, receiver: Receiver<Completion>, registry: Arc<Registry>, scheduler: Arc<Scheduler>) {
        while let Ok(completion) = receiver.recv() {
            // Step 3: if shutdown has been signalled, exit.
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.handle_completion(completion, &registry, &scheduler);
        }
    }

    fn handle_completion(&self, completion: Completion, registry: &Registry, scheduler: &Scheduler) {
        let Some(conn) = registry.get_connection(completion.connection_id) else {
            debug!(id = %completion.connection_id, "completion for unknown connection, dropping");
            return;
        };

        // Step 1: reset the timeout counter.
        conn.reset_timeout();
        // Step 2: decrement pending_operations.
        let remaining = conn.end_operation();

        // Step 4: failed op, or an op expected to read data that returned
        // zero bytes, redirects current_op to Shutdown/Close.
        let failed_or_eof = completion.result.as_ref().map(|&n| n == 0).unwrap_or(true)
            && matches!(completion.op, Op::GetContent | Op::ResumeGetContent { .. } | Op::Write);

        let Some(download) = registry.get_download(conn.download_id) else {
            warn!(id = %completion.connection_id, "connection has no owning download, closing");
            return;
        };

        let paused_or_queued = {
            let st = download.state.lock().unwrap();
            st.status.paused || st.status.queued
        };

        let mut state = conn.state.lock().unwrap();

        if failed_or_eof {
            state.current_op = if matches!(state.socket, crate::connection::Socket::Tls(_)) {
                Op::Shutdown
            } else {
                Op::Close
            };
        } else if paused_or_queued {
            // Step 5: record the partial read, do not re-arm.
            debug!(id = %completion.connection_id, "download paused/queued, not re-arming");
            drop(state);
            scheduler.on_part_stalled(conn.download_id, conn.id);
            return;
        } else {
            state.current_op = completion.op;
        }

        let op_to_run = state.current_op;
        drop(state);

        // Step 7: dispatch on current_op. `Connect`/`ResumeGetContent` drive
        // the whole protocol exchange for this Connection's Range in one
        // blocking call on this worker thread (see `crate::transfer`);
        // `KeepAlive` just writes a control-channel NOOP; `Close`/`Shutdown`
        // tear the socket down and report the Connection finished.
        match op_to_run {
            Op::Connect | Op::ResumeGetContent { .. } => {
                let outcome = crate::transfer::run(&conn, &download, scheduler.user_agent());
                let succeeded = matches!(outcome, crate::transfer::Outcome::Completed);
                if let crate::transfer::Outcome::Retryable(e) = &outcome {
                    warn!(connection = %conn.id, error = %e, "transfer failed, will retry per policy");
                }
                crate::transfer::close(&conn);
                scheduler.on_connection_finished(conn.download_id, conn.id, op_to_run, succeeded);
            }
            Op::KeepAlive => {
                crate::transfer::send_ftp_keepalive(&conn);
            }
            Op::Close | Op::Shutdown => {
                crate::transfer::close(&conn);
                scheduler.on_connection_finished(conn.download_id, conn.id, op_to_run, false);
            }
            _ => {
                if remaining == 0 && matches!(conn.state.lock().unwrap().cleanup, Cleanup::ForceRequested | Cleanup::AutoOnFinalCompletion) {
                    scheduler.on_connection_finished(conn.download_id, conn.id, op_to_run, completion.result.is_ok());
                }
            }
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_and_signal_shutdown_do_not_panic() {
        let r = Reactor::new();
        r.post(Completion { connection_id: ConnectionId::next(), op: Op::Close, result: Ok(0) });
        r.signal_shutdown();
    }
}
