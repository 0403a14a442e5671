//! Crawl job routes.

use std::str::FromStr;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{CrawlJobResponse, CreateCrawlRequest, RecentJobsQuery};
use crate::api::server::AppState;
use crate::domain::{CrawlJob, JobStatus};

/// Routes behind the API token.
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/api/crawls", get(list_crawls).post(create_crawl))
        .route("/api/crawls/{id}", get(get_crawl))
}

/// Routes readable without a token.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/api/crawls/recent", get(list_recent_crawls))
}

fn to_response(state: &AppState, jobs: Vec<CrawlJob>) -> Vec<CrawlJobResponse> {
    let publish = state.publish.as_deref();
    jobs.into_iter()
        .map(|job| CrawlJobResponse::from_job(job, publish))
        .collect()
}

/// `GET /api/crawls`: every job, oldest first.
async fn list_crawls(State(state): State<AppState>) -> ApiResult<Json<Vec<CrawlJobResponse>>> {
    let jobs = state.repository.list_jobs().await?;
    Ok(Json(to_response(&state, jobs)))
}

/// `POST /api/crawls`: queue a new job.
async fn create_crawl(
    State(state): State<AppState>,
    Json(request): Json<CreateCrawlRequest>,
) -> ApiResult<(StatusCode, Json<CrawlJobResponse>)> {
    let job = CrawlJob::new(request.urls)?;
    state.repository.create_job(&job).await?;

    info!(job_id = %job.id, urls = job.urls.len(), "Queued crawl");
    Ok((
        StatusCode::CREATED,
        Json(CrawlJobResponse::from_job(job, state.publish.as_deref())),
    ))
}

/// `GET /api/crawls/{id}`.
async fn get_crawl(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CrawlJobResponse>> {
    let job = state.repository.get_job(&id).await?;
    Ok(Json(CrawlJobResponse::from_job(job, state.publish.as_deref())))
}

/// `GET /api/crawls/recent?status=&limit=`: newest first.
async fn list_recent_crawls(
    State(state): State<AppState>,
    Query(query): Query<RecentJobsQuery>,
) -> ApiResult<Json<Vec<CrawlJobResponse>>> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(JobStatus::from_str(raw).map_err(|_| {
            ApiError::bad_request(format!(
                "Unknown status '{}'; expected pending, working, completed or failed",
                raw
            ))
        })?),
    };

    let jobs = state
        .repository
        .list_recent_jobs(status, query.effective_limit())
        .await?;
    Ok(Json(to_response(&state, jobs)))
}
