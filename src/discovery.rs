//! Discovery mode: probe identifiers and record what exists.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::input::CandidateIdentifier;
use crate::probe::{CandidateProber, ProbeMode, ValidatedResource};
use crate::scheduler::{
    ItemOutcome, ResourceSink, RunSummary, Scheduler, SchedulerError, SinkError, SinkOutcome,
    WorkHandler, WorkerContext,
};
use crate::session::Session;
use crate::store::OutputStore;

#[async_trait]
impl ResourceSink for OutputStore {
    async fn accept(
        &self,
        _session: &dyn Session,
        resource: ValidatedResource,
    ) -> Result<SinkOutcome, SinkError> {
        if self.append(&resource.url).await? {
            Ok(SinkOutcome::Recorded)
        } else {
            Ok(SinkOutcome::AlreadyPresent)
        }
    }

    fn already_recorded(&self, url: &str) -> bool {
        self.contains(url)
    }
}

/// Probes one identifier per call and hands hits to a sink.
///
/// Identifiers whose candidates were recorded by an earlier run are not
/// probed again: in first-match mode any recorded candidate skips the
/// identifier, in exhaustive mode only the recorded candidates are skipped.
pub struct DiscoveryHandler {
    prober: Arc<CandidateProber>,
    sink: Arc<dyn ResourceSink>,
}

impl DiscoveryHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(prober: Arc<CandidateProber>, sink: Arc<dyn ResourceSink>) -> Self {
        Self { prober, sink }
    }

    fn pending_urls(&self, identifier: &CandidateIdentifier) -> Option<Vec<String>> {
        let urls = self.prober.candidate_urls(identifier);
        let pending: Vec<String> = match self.prober.mode() {
            ProbeMode::FirstMatch if urls.iter().any(|url| self.sink.already_recorded(url)) => {
                return None;
            }
            ProbeMode::FirstMatch => urls,
            ProbeMode::Exhaustive => urls
                .into_iter()
                .filter(|url| !self.sink.already_recorded(url))
                .collect(),
        };
        (!pending.is_empty()).then_some(pending)
    }
}

#[async_trait]
impl WorkHandler<CandidateIdentifier> for DiscoveryHandler {
    async fn handle(&self, context: &WorkerContext, identifier: CandidateIdentifier) -> ItemOutcome {
        let Some(pending) = self.pending_urls(&identifier) else {
            return ItemOutcome::Skipped;
        };

        let session = context.session.as_ref();
        let found = self.prober.probe_urls(session, pending).await;
        if found.is_empty() {
            return ItemOutcome::NotFound;
        }

        let mut recorded = 0;
        let mut failed = false;
        for resource in found {
            let url = resource.url.clone();
            let classification = resource.classification;
            match self.sink.accept(session, resource).await {
                Ok(SinkOutcome::Recorded) => {
                    info!(
                        worker = context.worker_id,
                        url = %url,
                        classification = %classification,
                        "found resource"
                    );
                    recorded += 1;
                }
                Ok(SinkOutcome::AlreadyPresent) => {}
                Err(error) => {
                    warn!(url = %url, error = %error, "failed to hand off resource");
                    failed = true;
                }
            }
        }

        if failed {
            ItemOutcome::Failed
        } else if recorded > 0 {
            ItemOutcome::Found(recorded)
        } else {
            ItemOutcome::Skipped
        }
    }
}

/// Runs discovery over `identifiers`.
///
/// # Errors
///
/// Propagates [`SchedulerError`] from the shared-session setup.
pub async fn discover(
    scheduler: &Scheduler,
    prober: Arc<CandidateProber>,
    sink: Arc<dyn ResourceSink>,
    identifiers: Vec<CandidateIdentifier>,
) -> Result<RunSummary, SchedulerError> {
    let handler: Arc<dyn WorkHandler<CandidateIdentifier>> =
        Arc::new(DiscoveryHandler::new(prober, sink));
    scheduler.run(identifiers, handler).await
}
