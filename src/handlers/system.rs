use axum::{extract::State, response::Json};

use crate::control::facts::{self, AgentInfo};
use crate::core::HostFacts;
use crate::AppState;

pub async fn get_facts(State(state): State<AppState>) -> Json<HostFacts> {
    Json(facts::get_facts(&state).await)
}

pub async fn get_info(State(state): State<AppState>) -> Json<AgentInfo> {
    Json(facts::agent_info(&state).await)
}
