//! Public error type for the engine.
//!
//! Internal, single-module plumbing keeps using `anyhow::Result` the way
//! `turbo-downloader`'s `engine.rs` does; anything that crosses the public
//! API surface is converted into a variant here.

use thiserror::Error;

use crate::ids::DownloadId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("download {0} not found")]
    UnknownDownload(DownloadId),

    #[error("download {0} is in a terminal state and cannot accept new connections")]
    Terminal(DownloadId),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("proxy authentication required")]
    ProxyAuthRequired,

    #[error("remote file was modified since the download record was persisted")]
    RemoteModified,

    #[error("reported file size exceeds the configured limit")]
    FileTooLarge,

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
