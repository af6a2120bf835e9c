//! Lexicache Coordinator - Build, Job and Maintenance Coordination
//!
//! The coordination layer between the cache store and the host
//! application: keeping local search indexes consistent with their
//! source documents, driving deferred remote lookups through the poll
//! protocol, fanning searches out across sources, and pruning the
//! cache in the background.

pub mod build;
pub mod constants;
pub mod jobs;
pub mod maintenance;
pub mod search;

pub use build::{BuildCoordinator, BuildOutcome, BuildReport, IndexMetadata, MetadataRepository};
pub use jobs::{JobCoordinator, JobCoordinatorConfig, PendingJob, PollOutcome};
pub use maintenance::{prune_task, PruneMetrics, PruneSnapshot, PruneTaskConfig};
pub use search::{SearchCoordinator, SearchOutcome, SearchStats};
