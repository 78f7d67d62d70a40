//! Minimal CLI front-end exercising [`rangefetch::Engine`].
//!
//! Grounded in `turbo-downloader`'s own `bin`-less pattern (it is a
//! library consumed by the Hermes runtime); this binary plays the role
//! `hermes/bin` plays for that crate — a thin driver that wires up
//! logging and calls into the library.

use std::path::PathBuf;
use std::time::Duration;

use rangefetch::{DownloadOptions, Engine, EngineOptions};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: rangefetchctl <url> [target-dir]");
        std::process::exit(2);
    };
    let target_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    let filename = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string();

    let engine = Engine::new(EngineOptions::default());
    let id = engine.add(url, target_dir, filename, DownloadOptions::default())?;

    loop {
        std::thread::sleep(Duration::from_millis(500));
        let Some(progress) = engine.progress(id) else { break };
        println!("{}", progress.human_line());
        if progress.state == "Completed" || progress.state == "Failed" || progress.state == "Stopped" {
            break;
        }
    }

    engine.shutdown();
    Ok(())
}
