//! Serial event loop feeding the engine.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, EventOutcome};
use crate::source::ResourceEvent;

/// Counters over one run of the event loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub applied: u64,
    pub ignored: u64,
    pub rejected: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &EventOutcome) {
        self.processed += 1;
        match outcome {
            EventOutcome::Ignored(_) => self.ignored += 1,
            EventOutcome::Rejected(_) => self.rejected += 1,
            EventOutcome::Applied { .. } | EventOutcome::RolledBack { .. } => self.applied += 1,
        }
    }
}

pub struct Controller {
    engine: Arc<Engine>,
}

impl Controller {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Handles one event to completion.
    pub async fn dispatch(&self, event: &ResourceEvent) -> EventOutcome {
        match event {
            ResourceEvent::Created(resource) => self.engine.on_create(resource).await,
            ResourceEvent::Updated { old, new } => self.engine.on_update(old, new).await,
            ResourceEvent::Deleted(resource) => self.engine.on_delete(resource).await,
        }
    }

    /// Processes events one at a time until the channel closes or `shutdown`
    /// is cancelled. An event already in progress is finished first.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ResourceEvent>,
        shutdown: CancellationToken,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        tracing::info!("Controller started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let outcome = self.dispatch(&event).await;
            tracing::debug!(resource = %event.key(), outcome = ?outcome, "Event processed");
            summary.record(&outcome);
        }

        tracing::info!(
            processed = summary.processed,
            applied = summary.applied,
            ignored = summary.ignored,
            rejected = summary.rejected,
            "Controller stopped"
        );
        summary
    }
}
