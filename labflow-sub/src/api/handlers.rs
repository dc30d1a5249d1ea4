//! HTTP request handlers
//!
//! Handlers load the submission aggregate, run the domain operation, persist
//! the outcome, and map domain errors to status codes: validation failures
//! are 422 with structured field errors, state conflicts are 409.

use crate::api::server::AppContext;
use crate::db;
use crate::domain::{Request, Submission, SubmissionState};
use crate::error::{Error, ValidationErrors};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

type HandlerError = (StatusCode, Json<ErrorResponse>);
type HandlerResult<T> = std::result::Result<T, HandlerError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ValidationErrors>,
}

fn error_response(err: Error) -> HandlerError {
    let status = match &err {
        Error::Validation(_) | Error::ForeignRequest { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::InvalidTransition { .. }
        | Error::NotBuilding { .. }
        | Error::MismatchedMultiplier { .. } => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("internal error: {}", err);
    }
    let details = match &err {
        Error::Validation(errors) => Some(errors.clone()),
        _ => None,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            details,
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct RequestView {
    pub id: i64,
    pub guid: Uuid,
    pub order_id: Option<i64>,
    pub request_type_id: i64,
    pub state: String,
    pub kind: String,
    pub source_asset_id: Option<i64>,
    pub target_asset_id: Option<i64>,
    pub pool_index: Option<usize>,
}

impl RequestView {
    fn from_request(request: &Request) -> Self {
        Self {
            id: request.id,
            guid: request.guid,
            order_id: request.order_id,
            request_type_id: request.request_type_id,
            state: request.state.to_string(),
            kind: request.kind.as_str().to_string(),
            source_asset_id: request.source_asset_id,
            target_asset_id: request.target_asset_id,
            pool_index: request.pool_index,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PoolView {
    pub order_id: i64,
    pub pool_index: usize,
    pub request_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionView {
    pub guid: Uuid,
    pub name: Option<String>,
    pub display_name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub order_count: usize,
    pub requests: Vec<RequestView>,
    pub pre_capture_pools: Vec<PoolView>,
}

impl SubmissionView {
    fn from_submission(submission: &Submission) -> Self {
        Self {
            guid: submission.guid,
            name: submission.name.clone(),
            display_name: submission.display_name(),
            state: submission.state.to_string(),
            message: submission.message.clone(),
            order_count: submission.orders.len(),
            requests: submission.requests.iter().map(RequestView::from_request).collect(),
            pre_capture_pools: submission
                .pre_capture_pools
                .iter()
                .map(|p| PoolView {
                    order_id: p.order_id,
                    pool_index: p.pool_index,
                    request_ids: p.request_ids.clone(),
                })
                .collect(),
        }
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "labflow-sub",
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubmissionRequest {
    pub name: Option<String>,
    pub orders: Vec<db::NewOrder>,
}

pub async fn create_submission(
    State(context): State<AppContext>,
    Json(body): Json<CreateSubmissionRequest>,
) -> HandlerResult<(StatusCode, Json<SubmissionView>)> {
    let submission = db::create_submission(&context.db, body.name, body.orders)
        .await
        .map_err(error_response)?;
    Ok((
        StatusCode::CREATED,
        Json(SubmissionView::from_submission(&submission)),
    ))
}

pub async fn get_submission(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<SubmissionView>> {
    let submission = db::load_submission_by_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    Ok(Json(SubmissionView::from_submission(&submission)))
}

/// Build the submission's request graph and pre-capture pools
pub async fn process_submission(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<SubmissionView>> {
    let mut submission = db::load_submission_by_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    let mut ids = db::next_ids(&context.db).await.map_err(error_response)?;

    match submission.process_submission(&context.registry, &mut ids) {
        Ok(()) => {
            submission.ready().map_err(error_response)?;
            db::save_build(&context.db, &submission)
                .await
                .map_err(error_response)?;
            Ok(Json(SubmissionView::from_submission(&submission)))
        }
        Err(Error::Validation(errors)) if submission.state == SubmissionState::Building => {
            // Record the failure on the submission before reporting it
            submission
                .fail(errors.to_string())
                .map_err(error_response)?;
            db::save_submission_state(&context.db, &submission)
                .await
                .map_err(error_response)?;
            Err(error_response(Error::Validation(errors)))
        }
        Err(e) => Err(error_response(e)),
    }
}

pub async fn delete_submission(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<StatusCode> {
    let submission = db::load_submission_by_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    submission.destroy_guard().map_err(error_response)?;
    db::delete_submission(&context.db, submission.id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_submission(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<SubmissionView>> {
    let mut submission = db::load_submission_by_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    submission.cancel().map_err(error_response)?;
    db::save_all_states(&context.db, &submission)
        .await
        .map_err(error_response)?;
    Ok(Json(SubmissionView::from_submission(&submission)))
}

pub async fn get_request(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<RequestView>> {
    let (submission, request_id) = db::load_submission_by_request_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    let request = submission
        .request(request_id)
        .ok_or_else(|| error_response(Error::NotFound(format!("request {}", guid))))?;
    Ok(Json(RequestView::from_request(request)))
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    /// Every request whose state changed, the acted-on request first
    pub updated: Vec<RequestView>,
}

async fn transition(
    context: AppContext,
    guid: Uuid,
    action: fn(&mut Submission, i64) -> crate::error::Result<Vec<i64>>,
) -> HandlerResult<Json<TransitionResponse>> {
    let (mut submission, request_id) = db::load_submission_by_request_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    let touched = action(&mut submission, request_id).map_err(error_response)?;
    db::save_request_states(&context.db, &submission, &touched)
        .await
        .map_err(error_response)?;

    let updated = touched
        .iter()
        .filter_map(|&id| submission.request(id))
        .map(RequestView::from_request)
        .collect();
    Ok(Json(TransitionResponse { updated }))
}

pub async fn start_request(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<TransitionResponse>> {
    transition(context, guid, Submission::start_request).await
}

pub async fn pass_request(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<TransitionResponse>> {
    transition(context, guid, Submission::pass_request).await
}

pub async fn fail_request(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<TransitionResponse>> {
    transition(context, guid, Submission::fail_request).await
}

/// Reopen a failed request for rework
pub async fn change_decision(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<RequestView>> {
    let (mut submission, request_id) = db::load_submission_by_request_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    submission.change_decision(request_id).map_err(error_response)?;
    db::save_request_states(&context.db, &submission, &[request_id])
        .await
        .map_err(error_response)?;
    let request = submission
        .request(request_id)
        .ok_or_else(|| error_response(Error::NotFound(format!("request {}", guid))))?;
    Ok(Json(RequestView::from_request(request)))
}

/// Resolve the downstream requests along from the given one
pub async fn next_requests(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<Vec<RequestView>>> {
    let (mut submission, request_id) = db::load_submission_by_request_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    let next = submission
        .next_requests_via_submission(request_id, &context.registry)
        .map_err(error_response)?;
    let views = next
        .iter()
        .filter_map(|&id| submission.request(id))
        .map(RequestView::from_request)
        .collect();
    Ok(Json(views))
}

pub async fn request_ready(
    State(context): State<AppContext>,
    Path(guid): Path<Uuid>,
) -> HandlerResult<Json<serde_json::Value>> {
    let (submission, request_id) = db::load_submission_by_request_guid(&context.db, guid)
        .await
        .map_err(error_response)?;
    let ready = submission.request_ready(request_id).map_err(error_response)?;
    Ok(Json(json!({ "ready": ready })))
}
