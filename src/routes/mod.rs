use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::map_response,
    response::Response,
    routing::{get, post, put},
    Router,
};

use crate::{
    handlers::{bundles, ca, health, instances, jobs, services, system},
    AppState, AGENT_VERSION, API_VERSION,
};

const MAX_BUNDLE_BYTES: usize = 512 * 1024 * 1024;

pub fn instances_router() -> Router<AppState> {
    Router::new()
        .route("/instances/", get(instances::list_instances))
        .route(
            "/instances/:name/",
            get(instances::get_instance)
                .put(instances::create_instance)
                .delete(instances::delete_instance),
        )
        .route("/instances/:name/upgrade/", post(instances::upgrade_instance))
}

pub fn ca_router() -> Router<AppState> {
    Router::new()
        .route("/ca/", get(ca::list_requests))
        .route(
            "/ca/:hostname/",
            get(ca::get_request)
                .put(ca::create_request)
                .delete(ca::delete_request),
        )
        .route("/ca/:hostname/sign/", post(ca::sign_request))
}

pub fn jobs_router() -> Router<AppState> {
    Router::new()
        .route("/jobs/", get(jobs::list_jobs))
        .route("/jobs/:id/", get(jobs::get_job))
        .route("/jobs/:id/wait/", get(jobs::wait_job))
}

pub fn services_router() -> Router<AppState> {
    Router::new()
        .route("/services/", get(services::list_services))
        .route("/services/:name/", get(services::get_service))
        .route("/services/:name/:action/", put(services::service_action))
}

pub fn bundles_router() -> Router<AppState> {
    Router::new()
        .route("/bundles/", get(bundles::list_bundles))
        .route(
            "/bundles/:bundle/:file",
            get(bundles::download_bundle)
                .put(bundles::upload_bundle)
                .delete(bundles::delete_bundle),
        )
        .layer(DefaultBodyLimit::max(MAX_BUNDLE_BYTES))
}

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/health/", get(health::list_checks).post(health::add_check))
        .route("/health/scheduled/", get(health::list_scheduled_checks))
        .route("/health/:id/", get(health::get_check).delete(health::remove_check))
        .route("/health/:id/details/", get(health::get_check))
        .route("/health/:id/pause/", post(health::pause_check))
        .route("/health/:id/resume/", post(health::resume_check))
        .route("/health/:id/run/", post(health::run_check))
}

pub fn system_router() -> Router<AppState> {
    Router::new()
        .route("/facts/", get(system::get_facts))
        .route("/info/", get(system::get_info))
}

async fn add_version_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("x-cast-agent-version", HeaderValue::from_static(AGENT_VERSION));
    headers.insert("x-cast-api-version", HeaderValue::from_static(API_VERSION));
    response
}

/// The full control API.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(instances_router())
        .merge(ca_router())
        .merge(jobs_router())
        .merge(services_router())
        .merge(bundles_router())
        .merge(health_router())
        .merge(system_router())
        .layer(map_response(add_version_headers))
        .with_state(state)
}
