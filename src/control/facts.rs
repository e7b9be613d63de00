use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::jobs::JobStats;
use crate::core::{CacheStats, HostFacts};
use crate::{AppState, AGENT_VERSION, API_VERSION};

#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub agent_version: &'static str,
    pub api_version: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub jobs: JobStats,
    pub lock_slots: usize,
    pub facts_cache: CacheStats,
}

pub async fn get_facts(state: &AppState) -> HostFacts {
    state.facts.get_facts().await
}

pub async fn agent_info(state: &AppState) -> AgentInfo {
    AgentInfo {
        agent_version: AGENT_VERSION,
        api_version: API_VERSION,
        started_at: state.started_at,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        jobs: state.jobs.stats().await,
        lock_slots: state.locks.lock_count(),
        facts_cache: state.facts.stats(),
    }
}
