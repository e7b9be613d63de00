//! Scheduled health checks.
//!
//! Checks are registered at runtime and, once scheduled, run on their own
//! interval task. Each keeps a short history of results, most recent first.

pub mod checks;

pub use checks::{Check, CheckDefinition, CheckResult, CheckStatus};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, Result};

pub const MAX_RESULTS: usize = 5;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(90);

struct ScheduledCheck {
    id: Uuid,
    check: Arc<Check>,
    interval: Duration,
    paused: bool,
    task: Option<JoinHandle<()>>,
    created_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    history: VecDeque<CheckResult>,
}

impl ScheduledCheck {
    fn record(&mut self, result: CheckResult) {
        self.last_run_at = Some(result.date);
        self.history.push_front(result);
        self.history.truncate(MAX_RESULTS);
    }

    fn view(&self) -> CheckView {
        CheckView {
            id: self.id,
            check: self.check.definition().clone(),
            interval_secs: self.interval.as_secs_f64(),
            scheduled: self.task.is_some(),
            paused: self.paused,
            status: self
                .history
                .front()
                .map(|result| result.status)
                .unwrap_or(CheckStatus::Unknown),
            created_at: self.created_at,
            last_run_at: self.last_run_at,
            history: self.history.iter().cloned().collect(),
        }
    }
}

/// API representation of a registered check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckView {
    pub id: Uuid,
    pub check: CheckDefinition,
    pub interval_secs: f64,
    pub scheduled: bool,
    pub paused: bool,
    pub status: CheckStatus,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub history: Vec<CheckResult>,
}

/// Registry of health checks and the tasks that run them.
#[derive(Clone)]
pub struct HealthMonitor {
    checks: Arc<RwLock<HashMap<Uuid, ScheduledCheck>>>,
    client: reqwest::Client,
}

impl HealthMonitor {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("cast-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            checks: Arc::new(RwLock::new(HashMap::new())),
            client,
        })
    }

    /// Register a check, optionally scheduling it right away.
    pub async fn add_check(&self, check: Check, interval: Duration, schedule: bool) -> CheckView {
        let mut entry = ScheduledCheck {
            id: Uuid::new_v4(),
            check: Arc::new(check),
            interval,
            paused: false,
            task: None,
            created_at: Utc::now(),
            last_run_at: None,
            history: VecDeque::with_capacity(MAX_RESULTS),
        };

        // The runner records into the map, so it must not start before the
        // entry is in it.
        let mut checks = self.checks.write().await;
        if schedule {
            entry.task = Some(self.spawn_runner(&entry));
            info!(check_id = %entry.id, interval_secs = interval.as_secs_f64(), "Check added and scheduled");
        } else {
            info!(check_id = %entry.id, "Check added, left unscheduled");
        }

        let view = entry.view();
        checks.insert(entry.id, entry);
        view
    }

    /// Every check, oldest first.
    pub async fn list_checks(&self) -> Vec<CheckView> {
        let checks = self.checks.read().await;
        let mut views: Vec<CheckView> = checks.values().map(ScheduledCheck::view).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        views
    }

    pub async fn list_scheduled(&self) -> Vec<CheckView> {
        self.list_checks()
            .await
            .into_iter()
            .filter(|check| check.scheduled)
            .collect()
    }

    pub async fn get_check(&self, id: Uuid) -> Result<CheckView> {
        let checks = self.checks.read().await;
        checks.get(&id).map(ScheduledCheck::view).ok_or_else(|| not_found(id))
    }

    /// Unschedule and drop a check.
    pub async fn remove_check(&self, id: Uuid) -> Result<bool> {
        let mut checks = self.checks.write().await;
        let entry = checks.remove(&id).ok_or_else(|| not_found(id))?;
        if let Some(task) = entry.task {
            task.abort();
        }
        info!(check_id = %id, "Check removed");
        Ok(true)
    }

    /// Stop running a scheduled check until it is resumed.
    pub async fn pause_check(&self, id: Uuid) -> Result<CheckView> {
        let mut checks = self.checks.write().await;
        let entry = checks.get_mut(&id).ok_or_else(|| not_found(id))?;
        if let Some(task) = entry.task.take() {
            task.abort();
            entry.paused = true;
            info!(check_id = %id, "Check paused");
        }
        Ok(entry.view())
    }

    pub async fn resume_check(&self, id: Uuid) -> Result<CheckView> {
        let mut checks = self.checks.write().await;
        let entry = checks.get_mut(&id).ok_or_else(|| not_found(id))?;
        if entry.paused && entry.task.is_none() {
            entry.task = Some(self.spawn_runner(entry));
            entry.paused = false;
            info!(check_id = %id, "Check resumed");
        }
        Ok(entry.view())
    }

    /// Run a check now, outside its schedule, and record the result.
    pub async fn run_check(&self, id: Uuid) -> Result<CheckResult> {
        let check = {
            let checks = self.checks.read().await;
            let entry = checks.get(&id).ok_or_else(|| not_found(id))?;
            Arc::clone(&entry.check)
        };

        let result = check.run(&self.client).await;
        record_result(&self.checks, id, result.clone()).await;
        Ok(result)
    }

    /// Schedule every unscheduled check. Paused checks stay paused unless
    /// `include_paused` is set.
    pub async fn schedule_checks(&self, include_paused: bool) {
        let mut checks = self.checks.write().await;
        for entry in checks.values_mut() {
            if entry.task.is_some() || (entry.paused && !include_paused) {
                continue;
            }
            entry.task = Some(self.spawn_runner(entry));
            entry.paused = false;
        }
    }

    /// Stop every running check task. Pause flags are left untouched.
    pub async fn unschedule_checks(&self) {
        let mut checks = self.checks.write().await;
        for entry in checks.values_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
        info!(checks = checks.len(), "Health checks unscheduled");
    }

    fn spawn_runner(&self, entry: &ScheduledCheck) -> JoinHandle<()> {
        let checks = Arc::clone(&self.checks);
        let client = self.client.clone();
        let check = Arc::clone(&entry.check);
        let id = entry.id;
        let period = entry.interval;

        tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;
                let result = check.run(&client).await;
                debug!(check_id = %id, status = ?result.status, details = %result.details, "Check ran");
                if !record_result(&checks, id, result).await {
                    break;
                }
            }
        })
    }
}

/// Store a result against its check. Returns false once the check is gone.
async fn record_result(checks: &RwLock<HashMap<Uuid, ScheduledCheck>>, id: Uuid, result: CheckResult) -> bool {
    match checks.write().await.get_mut(&id) {
        Some(entry) => {
            entry.record(result);
            true
        }
        None => false,
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Check '{}' does not exist.", id))
}
