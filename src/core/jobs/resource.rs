use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::job::{Job, JobAction, JobContext, ResourceKind};
use crate::core::lock_manager::LockManager;
use crate::error::JobError;

/// Executor for one kind of resource.
///
/// Implementations only describe how to find a resource and how to act on
/// it. Locking, the existence precondition and job bookkeeping are done by
/// [`ManagedResource`], so no implementation can forget to release a lock.
#[async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    /// In-memory handle for one named resource.
    type Handle: Send + Sync;

    fn kind(&self) -> ResourceKind;

    /// Construct the handle named `name`. Fails only when the name cannot
    /// denote a resource of this kind at all.
    async fn resolve(&self, name: &str) -> Result<Self::Handle, JobError>;

    async fn exists(&self, handle: &Self::Handle) -> bool;

    /// Run `action` against the resource. Called with the resource's lock
    /// held and after the intent's existence precondition was checked.
    async fn execute(&self, handle: &Self::Handle, action: &JobAction, ctx: &JobContext) -> Result<Value, JobError>;
}

/// Object-safe entry point the job manager dispatches through.
pub trait JobDispatch: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Start `job`. Must join the job's lock queue before returning so that
    /// jobs dispatched in order are granted the lock in that order.
    fn dispatch(&self, job: Arc<Job>);
}

/// Runs jobs for a [`ResourceManager`] under the composite-key lock.
pub struct ManagedResource<M> {
    manager: Arc<M>,
    locks: LockManager,
}

impl<M: ResourceManager> ManagedResource<M> {
    pub fn new(manager: Arc<M>, locks: LockManager) -> Self {
        Self { manager, locks }
    }

    pub fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    async fn perform(manager: &M, job: &Arc<Job>) -> Result<Value, JobError> {
        let handle = manager.resolve(job.resource_name()).await?;
        let exists = manager.exists(&handle).await;
        job.intent()
            .check_existence(manager.kind(), job.resource_name(), exists)?;

        let ctx = JobContext::new(Arc::clone(job));
        manager.execute(&handle, job.action(), &ctx).await
    }
}

impl<M: ResourceManager> JobDispatch for ManagedResource<M> {
    fn kind(&self) -> ResourceKind {
        self.manager.kind()
    }

    fn dispatch(&self, job: Arc<Job>) {
        let pending = self.locks.lock(job.lock_key());
        let manager = Arc::clone(&self.manager);

        tokio::spawn(async move {
            let mut guard = pending.acquired().await;
            job.mark_running();
            info!(
                job_id = %job.id(),
                resource = %guard.key(),
                action = job.action().name(),
                "Job started"
            );

            let result = AssertUnwindSafe(Self::perform(&manager, &job))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(job_id = %job.id(), resource = %guard.key(), "Job action panicked: {}", message);
                    Err(JobError::failed(format!("job action panicked: {}", message)))
                });

            guard.release();

            match &result {
                Ok(_) => info!(job_id = %job.id(), resource = %job.lock_key(), "Job completed"),
                Err(err) => warn!(job_id = %job.id(), resource = %job.lock_key(), error = %err, "Job failed"),
            }
            job.complete(result);
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
