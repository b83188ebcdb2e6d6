//! Destinations for validated resources.

use async_trait::async_trait;

use crate::archive::ArchiveError;
use crate::probe::ValidatedResource;
use crate::session::Session;
use crate::store::StoreError;

/// What a sink did with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Newly recorded or archived.
    Recorded,
    /// Already present from an earlier run or another worker.
    AlreadyPresent,
}

/// Errors from a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Output store write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Retrieval or container append failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Receives validated resources from workers.
///
/// Discovery records the URL; retrieval fetches the payload through the
/// worker's session and archives it.
#[async_trait]
pub trait ResourceSink: Send + Sync {
    /// Handles one resource found by `session`'s worker.
    async fn accept(
        &self,
        session: &dyn Session,
        resource: ValidatedResource,
    ) -> Result<SinkOutcome, SinkError>;

    /// Returns true if `url` was handled by an earlier run.
    fn already_recorded(&self, url: &str) -> bool;
}
