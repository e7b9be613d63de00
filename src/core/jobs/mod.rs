//! Jobs and their orchestration.
//!
//! A [`Job`] is one asynchronous unit of work against one named resource.
//! The [`JobManager`] registers it and hands it to the [`ResourceManager`]
//! for its kind, which runs it while holding the resource's lock.

pub mod job;
pub mod manager;
pub mod resource;

pub use job::{
    Job, JobAction, JobContext, JobId, JobIntent, JobOutcome, JobRecord, JobStatus, JobView, ResourceKind,
    ServiceAction,
};
pub use manager::{JobManager, JobStats};
pub use resource::{JobDispatch, ManagedResource, ResourceManager};
