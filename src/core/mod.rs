//! Orchestration primitives the agent is built on.
//!
//! Named FIFO locks, a fill-coalescing TTL cache, cached host facts, and the
//! job model that ties resource actions to those locks.

// Named FIFO locks keyed by `Kind:name`
pub mod lock_manager;

// TTL cache that runs one fill per cold key
pub mod coalescing_cache;

// Host fact probes
pub mod facts;

// Jobs, resource managers and the job registry
pub mod jobs;

pub mod logging;

pub use coalescing_cache::{CacheError, CacheStats, CoalescingCache};
pub use facts::{FactKind, FactsProvider, HostFacts};
pub use jobs::{Job, JobAction, JobManager, JobOutcome, JobStatus, ResourceKind, ResourceManager};
pub use lock_manager::{LockGuard, LockManager, PendingLock};
