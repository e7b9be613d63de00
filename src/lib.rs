//! cast-agent: a host-resident deployment agent.
//!
//! Mutating operations arrive over the HTTP control API and run as jobs:
//! each job is executed asynchronously, one at a time per named resource,
//! and any number of callers can wait for its outcome.

use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod handlers;
pub mod health;
pub mod resources;
pub mod routes;

pub use error::{AppError, JobError, Result};

use crate::config::AgentConfig;
use crate::core::{FactsProvider, JobManager, LockManager};
use crate::health::HealthMonitor;
use crate::resources::{BundleManager, InstanceManager, ServiceManager, SigningRequestManager};

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const API_VERSION: &str = "1.0";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub jobs: Arc<JobManager>,
    pub locks: LockManager,
    pub facts: FactsProvider,
    pub bundles: Arc<BundleManager>,
    pub instances: Arc<InstanceManager>,
    pub ca: Arc<SigningRequestManager>,
    pub services: Arc<ServiceManager>,
    pub health: HealthMonitor,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire every resource manager into a fresh job manager.
    pub fn build(config: AgentConfig, facts: FactsProvider) -> Result<Self> {
        let locks = LockManager::new();

        let bundles = Arc::new(BundleManager::new(config.bundle_dir.clone()));
        let instances = Arc::new(InstanceManager::new(
            config.app_dir.clone(),
            Arc::clone(&bundles),
            facts.clone(),
        ));
        let ca = Arc::new(SigningRequestManager::new(&config, facts.clone()));
        let services = Arc::new(ServiceManager::new(&config));

        let jobs = JobManager::new(locks.clone())
            .with_manager(Arc::clone(&bundles))?
            .with_manager(Arc::clone(&instances))?
            .with_manager(Arc::clone(&ca))?
            .with_manager(Arc::clone(&services))?;

        Ok(Self {
            config: Arc::new(config),
            jobs: Arc::new(jobs),
            locks,
            facts,
            bundles,
            instances,
            ca,
            services,
            health: HealthMonitor::new()?,
            started_at: Utc::now(),
        })
    }
}
