//! Speed history and the public progress snapshot.
//!
//! Ported from `turbo-downloader`'s `progress.rs`: a bucketed history of
//! `(Instant, bytes)` samples from which a recent-window transfer speed is
//! derived, plus a `Serialize`-able snapshot struct safe to hand to a host
//! UI or a persisted record.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::ids::DownloadId;
use crate::status::Status;

#[derive(Debug, Clone, Copy)]
struct ProgressHistoryEntry {
    at: Instant,
    bytes_total: u64,
}

/// Rolling window of byte-count samples used to compute a recent transfer
/// speed rather than an all-time average, which stays responsive to
/// throttling and stalls.
#[derive(Debug)]
pub struct ProgressHistory {
    entries: VecDeque<ProgressHistoryEntry>,
    max_entries: usize,
    keep_time: Duration,
}

impl ProgressHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: 64,
            keep_time: Duration::from_secs(10),
        }
    }

    pub fn add_bytes(&mut self, bytes_total: u64) {
        let now = Instant::now();
        self.entries.push_back(ProgressHistoryEntry { at: now, bytes_total });
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.at) > self.keep_time && self.entries.len() > 2 {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes/sec over the retained window, or 0 with fewer than two
    /// samples.
    pub fn get_speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.entries.front(), self.entries.back()) else {
            return 0.0;
        };
        if first.at == last.at || last.bytes_total < first.bytes_total {
            return 0.0;
        }
        let elapsed = last.at.duration_since(first.at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (last.bytes_total - first.bytes_total) as f64 / elapsed
    }
}

impl Default for ProgressHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Public, serializable snapshot of a Download's progress — handed to a
/// host UI or written into a persisted history record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub id: u64,
    pub url: String,
    pub filename: String,
    pub state: String,
    pub paused: bool,
    pub queued: bool,
    pub bytes_downloaded: u64,
    pub declared_file_size: Option<u64>,
    pub active_parts: usize,
    pub speed_bytes_per_sec: f64,
    pub eta_secs: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        let total = self.declared_file_size?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.bytes_downloaded as f64 / total as f64) * 100.0)
    }

    pub fn human_line(&self) -> String {
        let pct = self
            .percent()
            .map(|p| format!("{p:.1}%"))
            .unwrap_or_else(|| "?%".to_string());
        let speed = crate::util::bytes_to_human(self.speed_bytes_per_sec.max(0.0) as u64);
        match self.eta_secs {
            Some(eta) => format!("{pct} at {speed}/s, ETA {eta}s"),
            None => format!("{pct} at {speed}/s"),
        }
    }
}

pub fn eta_secs(remaining_bytes: u64, speed_bytes_per_sec: f64) -> Option<u64> {
    if speed_bytes_per_sec <= 0.0 {
        return None;
    }
    Some((remaining_bytes as f64 / speed_bytes_per_sec).ceil() as u64)
}

pub fn build_snapshot(
    id: DownloadId,
    url: &str,
    filename: &str,
    status: Status,
    bytes_downloaded: u64,
    declared_file_size: Option<u64>,
    active_parts: usize,
    speed: f64,
) -> DownloadProgress {
    let eta = declared_file_size
        .map(|total| total.saturating_sub(bytes_downloaded))
        .and_then(|remaining| eta_secs(remaining, speed));
    DownloadProgress {
        id: id.as_u64(),
        url: url.to_string(),
        filename: filename.to_string(),
        state: format!("{:?}", status.state),
        paused: status.paused,
        queued: status.queued,
        bytes_downloaded,
        declared_file_size,
        active_parts,
        speed_bytes_per_sec: speed,
        eta_secs: eta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn speed_is_zero_with_one_sample() {
        let mut h = ProgressHistory::new();
        h.add_bytes(100);
        assert_eq!(h.get_speed(), 0.0);
    }

    #[test]
    fn speed_is_positive_after_growth() {
        let mut h = ProgressHistory::new();
        h.add_bytes(0);
        sleep(Duration::from_millis(20));
        h.add_bytes(1000);
        assert!(h.get_speed() > 0.0);
    }

    #[test]
    fn eta_none_at_zero_speed() {
        assert_eq!(eta_secs(1000, 0.0), None);
    }

    #[test]
    fn percent_is_none_without_declared_size() {
        let snap = build_snapshot(
            DownloadId::next(),
            "http://x",
            "f",
            Status::default(),
            10,
            None,
            1,
            0.0,
        );
        assert_eq!(snap.percent(), None);
    }
}
