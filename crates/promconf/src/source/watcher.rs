//! Filesystem watcher driving [`ManifestSource`] rescans.

use std::path::Path;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ManifestSource, ResourceEvent, Result};
use crate::error::SourceError;

const DEBOUNCE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct SourceWatcher {
    source: ManifestSource,
    sender: mpsc::Sender<ResourceEvent>,
    shutdown: CancellationToken,
    resync: Option<Duration>,
}

impl SourceWatcher {
    pub fn new(
        source: ManifestSource,
        sender: mpsc::Sender<ResourceEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            sender,
            shutdown,
            resync: None,
        }
    }

    /// Re-deliver every known resource on this interval.
    pub fn with_resync(mut self, interval: Option<Duration>) -> Self {
        self.resync = interval.filter(|d| !d.is_zero());
        self
    }

    /// Runs [`watch`](Self::watch) on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        std::thread::Builder::new()
            .name("manifest-watcher".to_string())
            .spawn(move || self.watch())
            .map_err(|e| SourceError::Watch(e.to_string()))
    }

    /// Sends the initial listing, then a diff after every debounced change.
    ///
    /// Blocks until the shutdown token is cancelled or the receiver is
    /// dropped. Must not be called from inside the async runtime.
    pub fn watch(mut self) -> Result<()> {
        let initial = self.source.rescan()?;
        tracing::info!(
            dir = %self.source.dir().display(),
            resources = initial.len(),
            "Loaded manifests"
        );
        self.send_all(initial)?;

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer: Debouncer<RecommendedWatcher> =
            new_debouncer(DEBOUNCE, tx).map_err(|e| SourceError::Watch(e.to_string()))?;
        debouncer
            .watcher()
            .watch(self.source.dir(), RecursiveMode::Recursive)
            .map_err(|e| SourceError::Watch(e.to_string()))?;

        tracing::info!(dir = %self.source.dir().display(), "Started watching manifests");

        let mut last_resync = Instant::now();
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(events)) => {
                    if events.iter().any(is_relevant) {
                        self.refresh()?;
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!(err = %e, "Watch error");
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }

            if let Some(interval) = self.resync {
                if last_resync.elapsed() >= interval {
                    tracing::debug!("Resyncing manifests");
                    self.send_all(self.source.resync())?;
                    last_resync = Instant::now();
                }
            }
        }

        tracing::info!("Stopped watching manifests");
        Ok(())
    }

    /// A broken manifest is logged and the previous state kept until the
    /// next change.
    fn refresh(&mut self) -> Result<()> {
        match self.source.rescan() {
            Ok(events) => self.send_all(events),
            Err(e) => {
                tracing::error!(err = %e, "Failed to rescan manifests");
                Ok(())
            }
        }
    }

    fn send_all(&self, events: Vec<ResourceEvent>) -> Result<()> {
        for event in events {
            self.sender
                .blocking_send(event)
                .map_err(|_| SourceError::ChannelClosed)?;
        }
        Ok(())
    }
}

/// Manifest files and anything that might have been a directory.
fn is_relevant(event: &DebouncedEvent) -> bool {
    let path: &Path = &event.path;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => true,
        Some(_) => false,
        None => path.is_dir() || !path.exists(),
    }
}
