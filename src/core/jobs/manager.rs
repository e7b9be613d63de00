use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::job::{Job, JobId, JobStatus, ResourceKind};
use super::resource::{JobDispatch, ManagedResource, ResourceManager};
use crate::core::lock_manager::LockManager;
use crate::error::{AppError, Result};

#[derive(Default)]
struct JobRegistry {
    jobs: HashMap<JobId, Arc<Job>>,
    order: Vec<JobId>,
}

/// Per-status job counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub ready: usize,
    pub failed: usize,
}

/// Owns the job registry and routes every job to the resource manager
/// registered for its kind.
pub struct JobManager {
    dispatchers: HashMap<ResourceKind, Arc<dyn JobDispatch>>,
    registry: RwLock<JobRegistry>,
    locks: LockManager,
}

impl JobManager {
    pub fn new(locks: LockManager) -> Self {
        Self {
            dispatchers: HashMap::new(),
            registry: RwLock::new(JobRegistry::default()),
            locks,
        }
    }

    /// Register the manager for its resource kind. Registering a second
    /// manager for the same kind is a fatal configuration error.
    pub fn register<M: ResourceManager>(&mut self, manager: Arc<M>) -> Result<()> {
        let kind = manager.kind();
        if self.dispatchers.contains_key(&kind) {
            error!(kind = %kind, "Resource manager registered twice");
            return Err(AppError::Configuration(format!(
                "resource manager for '{}' is already registered",
                kind
            )));
        }

        let dispatcher = ManagedResource::new(manager, self.locks.clone());
        self.dispatchers.insert(kind, Arc::new(dispatcher));
        debug!(kind = %kind, "Resource manager registered");
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_manager<M: ResourceManager>(mut self, manager: Arc<M>) -> Result<Self> {
        self.register(manager)?;
        Ok(self)
    }

    pub fn is_registered(&self, kind: ResourceKind) -> bool {
        self.dispatchers.contains_key(&kind)
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Submit a job. Returns as soon as the job is registered and queued on
    /// its resource's lock; the job itself runs in the background.
    pub async fn run(&self, mut job: Job) -> Result<Arc<Job>> {
        let kind = job.kind();
        let dispatcher = self.dispatchers.get(&kind).cloned().ok_or_else(|| {
            error!(kind = %kind, "No resource manager registered");
            AppError::Configuration(format!("no resource manager registered for '{}'", kind))
        })?;

        let mut registry = self.registry.write().await;

        let mut id = Uuid::new_v4();
        while registry.jobs.contains_key(&id) {
            id = Uuid::new_v4();
        }
        job.assign_id(id);

        let job = Arc::new(job);
        registry.jobs.insert(id, Arc::clone(&job));
        registry.order.push(id);

        // Dispatching under the registry lock keeps lock-queue order equal
        // to registry order.
        dispatcher.dispatch(Arc::clone(&job));
        drop(registry);

        info!(
            job_id = %id,
            resource = %job.lock_key(),
            intent = ?job.intent(),
            action = job.action().name(),
            "Job submitted"
        );
        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Arc<Job>> {
        self.registry
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Job '{}' does not exist.", id)))
    }

    /// Every known job, oldest first.
    pub async fn list_jobs(&self) -> Vec<Arc<Job>> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.jobs.get(id).cloned())
            .collect()
    }

    pub async fn stats(&self) -> JobStats {
        let registry = self.registry.read().await;
        let mut stats = JobStats {
            total: registry.jobs.len(),
            ..JobStats::default()
        };
        for job in registry.jobs.values() {
            match job.status() {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Ready => stats.ready += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Drop terminal jobs that finished more than `older_than` ago, then
    /// drop idle lock slots. Returns the number of jobs removed.
    pub async fn prune_finished(&self, older_than: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut registry = self.registry.write().await;
        let before = registry.jobs.len();
        registry.jobs.retain(|_, job| {
            let record = job.record();
            !(record.status.is_terminal() && record.finished_at.map(|at| at < cutoff).unwrap_or(false))
        });
        let JobRegistry { jobs, order } = &mut *registry;
        order.retain(|id| jobs.contains_key(id));
        let pruned = before - registry.jobs.len();
        drop(registry);

        let locks = self.locks.prune_idle();
        if pruned > 0 {
            info!(pruned, locks, "Pruned finished jobs");
        }
        pruned
    }

    /// Periodically prune finished jobs older than `retention`.
    pub fn spawn_sweeper(self: &Arc<Self>, retention: Duration, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.prune_finished(retention).await;
            }
        })
    }
}
