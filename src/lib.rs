//! Mediaprobe Core Library
//!
//! Discovers and retrieves media resources that sit behind a gated web
//! endpoint. A resource's exact name is unknown up front, so each base
//! identifier is probed with several extension candidates on sessions that
//! have cleared the endpoint's challenge and consent gate.
//!
//! # Architecture
//!
//! - [`input`] - Identifier listings and index/range selection
//! - [`auth`] - Netscape cookie import for handing over gate clearance
//! - [`session`] - Browsing sessions (`Session` trait, reqwest implementation)
//! - [`gate`] - Two-stage gate state machine and its cancellable wait
//! - [`probe`] - Candidate probing and classification
//! - [`store`] - Durable, deduplicated output store
//! - [`scheduler`] - Worker pool with static or dynamic partitioning
//! - [`discovery`] - Discovery mode (probe and record)
//! - [`archive`] - Retrieval mode (fetch into a resumable ZIP container)

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod auth;
pub mod constants;
pub mod discovery;
pub mod gate;
pub mod input;
pub mod probe;
pub mod scheduler;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use archive::{ArchiveAssembler, ArchiveError, ArchiveManifest, AssemblySummary, Compression};
pub use constants::Coverage;
pub use discovery::{DiscoveryHandler, discover};
pub use gate::{GateController, GateError, GatePolicy, GateSignals, GateState, SessionHandle};
pub use input::{CandidateIdentifier, InputError, Selection, load_identifiers};
pub use probe::{
    CandidateProber, Classification, ExtensionCandidate, ProbeMode, ProbeResult, ValidatedResource,
};
pub use scheduler::{
    ItemOutcome, Partition, ResourceSink, RunStats, RunSummary, Scheduler, SchedulerConfig,
    SchedulerError, SessionMode, WorkHandler, WorkerContext,
};
pub use session::{HttpSessionConfig, HttpSessionFactory, Session, SessionError, SessionFactory};
pub use store::{OutputStore, StoreError};
