use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{AppError, JobError};

pub type JobId = Uuid;

/// The kinds of resource the agent manages. Each kind has exactly one
/// resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Bundle,
    Instance,
    SigningRequest,
    Service,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Bundle,
        ResourceKind::Instance,
        ResourceKind::SigningRequest,
        ResourceKind::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Bundle => "Bundle",
            ResourceKind::Instance => "Instance",
            ResourceKind::SigningRequest => "SigningRequest",
            ResourceKind::Service => "Service",
        }
    }

    /// Name of the lock serializing jobs against `name`. The kind is part of
    /// the key, so an instance and a signing request that share a name never
    /// wait on each other.
    pub fn lock_key(&self, name: &str) -> String {
        format!("{}:{}", self.as_str(), name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job expects of its resource's existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobIntent {
    Create,
    Update,
    Delete,
}

impl JobIntent {
    pub fn resource_must_exist(&self) -> bool {
        !matches!(self, JobIntent::Create)
    }

    pub fn resource_must_not_exist(&self) -> bool {
        matches!(self, JobIntent::Create)
    }

    /// Check a resource's existence against this intent.
    pub fn check_existence(&self, kind: ResourceKind, name: &str, exists: bool) -> Result<(), JobError> {
        if self.resource_must_exist() && !exists {
            return Err(JobError::not_found(kind, name));
        }
        if self.resource_must_not_exist() && exists {
            return Err(JobError::already_exists(kind, name));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Enable,
    Disable,
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

impl FromStr for ServiceAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enable" => Ok(ServiceAction::Enable),
            "disable" => Ok(ServiceAction::Disable),
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(AppError::BadRequest(format!("Invalid service action: {}", other))),
        }
    }
}

/// The work a job performs. Arguments are captured when the job is built
/// and never change afterwards. The variant fixes the resource kind and the
/// intent, so a job cannot be routed to the wrong manager.
#[derive(Debug, Clone)]
pub enum JobAction {
    UploadBundle {
        bundle: String,
        version: String,
        archive: Bytes,
    },
    DeleteBundle {
        bundle: String,
        version: String,
    },
    CreateInstance {
        bundle_name: String,
        bundle_version: String,
    },
    UpgradeInstance {
        bundle_version: String,
    },
    DestroyInstance,
    CreateSigningRequest {
        csr: String,
    },
    SignRequest {
        overwrite: bool,
    },
    DeleteSigningRequest,
    ServiceAction(ServiceAction),
}

impl JobAction {
    pub fn kind(&self) -> ResourceKind {
        match self {
            JobAction::UploadBundle { .. } | JobAction::DeleteBundle { .. } => ResourceKind::Bundle,
            JobAction::CreateInstance { .. } | JobAction::UpgradeInstance { .. } | JobAction::DestroyInstance => {
                ResourceKind::Instance
            }
            JobAction::CreateSigningRequest { .. } | JobAction::SignRequest { .. } | JobAction::DeleteSigningRequest => {
                ResourceKind::SigningRequest
            }
            JobAction::ServiceAction(_) => ResourceKind::Service,
        }
    }

    pub fn intent(&self) -> JobIntent {
        match self {
            JobAction::UploadBundle { .. }
            | JobAction::CreateInstance { .. }
            | JobAction::CreateSigningRequest { .. } => JobIntent::Create,
            JobAction::UpgradeInstance { .. } | JobAction::SignRequest { .. } | JobAction::ServiceAction(_) => {
                JobIntent::Update
            }
            JobAction::DeleteBundle { .. } | JobAction::DestroyInstance | JobAction::DeleteSigningRequest => {
                JobIntent::Delete
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobAction::UploadBundle { .. } => "upload",
            JobAction::DeleteBundle { .. } => "delete",
            JobAction::CreateInstance { .. } => "create",
            JobAction::UpgradeInstance { .. } => "upgrade",
            JobAction::DestroyInstance => "destroy",
            JobAction::CreateSigningRequest { .. } => "create",
            JobAction::SignRequest { .. } => "sign",
            JobAction::DeleteSigningRequest => "delete",
            JobAction::ServiceAction(_) => "serviceAction",
        }
    }

    /// Ordered action arguments as reported to API clients. Archive payloads
    /// are reported by size.
    pub fn args(&self) -> Vec<Value> {
        match self {
            JobAction::UploadBundle { bundle, version, archive } => {
                vec![json!(bundle), json!(version), json!({ "bytes": archive.len() })]
            }
            JobAction::DeleteBundle { bundle, version } => vec![json!(bundle), json!(version)],
            JobAction::CreateInstance {
                bundle_name,
                bundle_version,
            } => vec![json!(bundle_name), json!(bundle_version)],
            JobAction::UpgradeInstance { bundle_version } => vec![json!(bundle_version)],
            JobAction::CreateSigningRequest { csr } => vec![json!(csr)],
            JobAction::SignRequest { overwrite } => vec![json!(overwrite)],
            JobAction::ServiceAction(action) => vec![json!(action.as_str())],
            JobAction::DestroyInstance | JobAction::DeleteSigningRequest => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Ready,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum JobOutcome {
    #[serde(rename = "success")]
    Success(Value),
    #[serde(rename = "error")]
    Failure(JobError),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobOutcome::Failure(err) => Some(err),
            JobOutcome::Success(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Value, JobError> {
        match self {
            JobOutcome::Success(value) => Ok(value),
            JobOutcome::Failure(err) => Err(err),
        }
    }
}

/// Mutable part of a job. Published as a whole through a watch channel so
/// a reader never sees a status without its outcome.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub status: JobStatus,
    pub outcome: Option<JobOutcome>,
    pub messages: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            status: JobStatus::Queued,
            outcome: None,
            messages: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// One asynchronous unit of work against one named resource.
pub struct Job {
    id: JobId,
    resource_name: String,
    action: JobAction,
    created_at: DateTime<Utc>,
    record: watch::Sender<JobRecord>,
}

impl Job {
    /// Describe a job. It gets its id when submitted to the job manager.
    pub fn new(resource_name: impl Into<String>, action: JobAction) -> Self {
        let (record, _) = watch::channel(JobRecord::default());

        Self {
            id: Uuid::nil(),
            resource_name: resource_name.into(),
            action,
            created_at: Utc::now(),
            record,
        }
    }

    pub(crate) fn assign_id(&mut self, id: JobId) {
        self.id = id;
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.action.kind()
    }

    pub fn intent(&self) -> JobIntent {
        self.action.intent()
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn action(&self) -> &JobAction {
        &self.action
    }

    pub fn lock_key(&self) -> String {
        self.kind().lock_key(&self.resource_name)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> JobStatus {
        self.record.borrow().status
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.record.borrow().outcome.clone()
    }

    pub fn record(&self) -> JobRecord {
        self.record.borrow().clone()
    }

    /// A receiver that sees every later change to the job's record.
    pub fn subscribe(&self) -> watch::Receiver<JobRecord> {
        self.record.subscribe()
    }

    /// Move from queued to running. Returns false if the job had already
    /// left the queued state.
    pub(crate) fn mark_running(&self) -> bool {
        self.record.send_if_modified(|record| {
            if record.status != JobStatus::Queued {
                return false;
            }
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now());
            true
        })
    }

    /// Record the job's outcome. Only the first call has any effect.
    pub(crate) fn complete(&self, result: Result<Value, JobError>) -> bool {
        self.record.send_if_modified(|record| {
            if record.status.is_terminal() {
                return false;
            }
            let (status, outcome) = match result {
                Ok(value) => (JobStatus::Ready, JobOutcome::Success(value)),
                Err(err) => (JobStatus::Failed, JobOutcome::Failure(err)),
            };
            record.status = status;
            record.outcome = Some(outcome);
            record.finished_at = Some(Utc::now());
            true
        })
    }

    pub(crate) fn push_message(&self, message: String) {
        self.record.send_modify(|record| record.messages.push(message));
    }

    /// Wait for the job to finish.
    ///
    /// Returns at once if the job is already terminal; otherwise resolves
    /// exactly once, when the outcome is recorded.
    pub async fn wait(&self) -> JobOutcome {
        let mut rx = self.record.subscribe();
        let outcome = match rx.wait_for(|record| record.status.is_terminal()).await {
            Ok(record) => record.outcome.clone(),
            // The sender lives inside `self`, so the channel cannot close here.
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| JobOutcome::Failure(JobError::failed("job finished without an outcome")))
    }

    /// Serializable view of the job, taken from a single read of its record.
    pub fn snapshot(&self) -> JobView {
        let record = self.record();

        JobView {
            id: self.id,
            resource_type: self.kind(),
            resource_name: self.resource_name.clone(),
            intent: self.intent(),
            action: self.action.name(),
            args: self.action.args(),
            status: record.status,
            messages: record.messages,
            result: record.outcome,
            created_at: self.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("resource", &self.lock_key())
            .field("action", &self.action.name())
            .field("status", &self.status())
            .finish()
    }
}

impl Serialize for Job {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub resource_type: ResourceKind,
    pub resource_name: String,
    pub intent: JobIntent,
    pub action: &'static str,
    pub args: Vec<Value>,
    pub status: JobStatus,
    pub messages: Vec<String>,
    pub result: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Handed to a resource action while it runs.
#[derive(Clone)]
pub struct JobContext {
    job: Arc<Job>,
}

impl JobContext {
    pub fn new(job: Arc<Job>) -> Self {
        Self { job }
    }

    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    pub fn resource_name(&self) -> &str {
        self.job.resource_name()
    }

    /// Append a progress message to the job's log.
    pub fn message(&self, message: impl Into<String>) {
        self.job.push_message(message.into());
    }
}
