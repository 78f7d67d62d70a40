//! Timeout Sweeper (§4.5): a single low-priority thread that ages out
//! stalled Connections and keeps FTP control channels alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::{Cleanup, Op};
use crate::options::EngineOptions;
use crate::reactor::{Completion, Reactor};
use crate::registry::Registry;

pub struct Sweeper {
    idle: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl Sweeper {
    pub fn new() -> Self {
        Self { idle: Arc::new(AtomicBool::new(false)), stop: Arc::new(AtomicBool::new(false)) }
    }

    pub fn idle(&self) {
        self.idle.store(true, Ordering::SeqCst);
    }

    pub fn wake(&self) {
        self.idle.store(false, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn spawn(&self, registry: Arc<Registry>, reactor: Arc<Reactor>, options: EngineOptions) {
        let idle = self.idle.clone();
        let stop = self.stop.clone();
        std::thread::Builder::new()
            .name("rangefetch-timeout-sweeper".into())
            .spawn(move || sweep_loop(registry, reactor, options, idle, stop))
            .expect("spawning timeout sweeper thread");
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new()
    }
}

fn sweep_loop(registry: Arc<Registry>, reactor: Arc<Reactor>, options: EngineOptions, idle: Arc<AtomicBool>, stop: Arc<AtomicBool>) {
    loop {
        std::thread::sleep(options.sweeper_interval);
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if idle.load(Ordering::SeqCst) || options.timeout_secs == 0 {
            continue;
        }
        sweep_once(&registry, &reactor, &options);
    }
}

fn sweep_once(registry: &Registry, reactor: &Reactor, options: &EngineOptions) {
    for download in registry.all_downloads() {
        let paused_or_queued = {
            let st = download.state.lock().unwrap();
            st.status.paused || st.status.queued
        };
        for conn in registry.connections_for_download(download.id) {
            // Try to acquire the Connection's lock without blocking; skip
            // it this tick if another worker currently owns it (§4.5).
            let Ok(mut state) = conn.state.try_lock() else { continue };

            if state.is_ftp_control {
                if conn.bump_timeout() as u64 % (options.ftp_keepalive_interval.as_secs() / options.sweeper_interval.as_secs().max(1)).max(1) == 0 {
                    debug!(connection = %conn.id, "sending FTP keepalive NOOP");
                    drop(state);
                    conn.begin_operation();
                    reactor.post(Completion { connection_id: conn.id, op: Op::KeepAlive, result: Ok(0) });
                }
                continue;
            }

            let count = conn.bump_timeout();
            if count as u64 >= options.timeout_secs / options.sweeper_interval.as_secs().max(1) && !paused_or_queued {
                warn!(connection = %conn.id, "connection timed out, forcing cleanup");
                state.cleanup = Cleanup::ForceRequested;
                let close_op = if matches!(state.socket, crate::connection::Socket::Tls(_)) { Op::Shutdown } else { Op::Close };
                drop(state);
                conn.begin_operation();
                reactor.post(Completion { connection_id: conn.id, op: close_op, result: Ok(0) });
            }
        }
    }
}
