//! Stable-ID object graph (§9 design notes).
//!
//! Replaces the original's raw-pointer `context` / `connection_info`
//! cross-links with ordinary lookups through shared, lock-striped maps.
//! Everything downstream refers to a Download or Connection by its
//! [`DownloadId`] / [`ConnectionId`] and resolves through here rather than
//! holding an `Arc` directly across a lock boundary.

use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::Connection;
use crate::download::Download;
use crate::ids::{ConnectionId, DownloadId};

#[derive(Default)]
pub struct Registry {
    downloads: DashMap<DownloadId, Arc<Download>>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_download(&self, download: Arc<Download>) {
        self.downloads.insert(download.id, download);
    }

    pub fn get_download(&self, id: DownloadId) -> Option<Arc<Download>> {
        self.downloads.get(&id).map(|e| e.value().clone())
    }

    pub fn remove_download(&self, id: DownloadId) -> Option<Arc<Download>> {
        self.downloads.remove(&id).map(|(_, v)| v)
    }

    pub fn all_downloads(&self) -> Vec<Arc<Download>> {
        self.downloads.iter().map(|e| e.value().clone()).collect()
    }

    pub fn insert_connection(&self, conn: Arc<Connection>) {
        self.connections.insert(conn.id, conn);
    }

    pub fn get_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|e| e.value().clone())
    }

    pub fn remove_connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(&id).map(|(_, v)| v)
    }

    pub fn connections_for_download(&self, download_id: DownloadId) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|e| e.value().download_id == download_id)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DownloadOptions;
    use std::path::PathBuf;

    #[test]
    fn insert_and_fetch_download_round_trips() {
        let reg = Registry::new();
        let d = Arc::new(Download::new(
            DownloadId::next(),
            "http://example.com/f".into(),
            PathBuf::from("/tmp"),
            "f".into(),
            DownloadOptions::default(),
        ));
        let id = d.id;
        reg.insert_download(d);
        assert!(reg.get_download(id).is_some());
        assert!(reg.remove_download(id).is_some());
        assert!(reg.get_download(id).is_none());
    }
}
