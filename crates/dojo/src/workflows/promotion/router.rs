use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use super::domain::{
    BeltId, EnrollmentId, EnrollmentRequest, EssayId, EssayReviewRequest, EssaySubmission,
    NewBelt, NewProgram, NewRequirement, ProgramId, ProgramQuery, ProgressUpdate,
    PromotionRequest, RequirementId,
};
use super::repository::PromotionRepository;
use super::service::{PromotionService, PromotionServiceError};
use crate::workflows::access::Caller;
use crate::workflows::notify::NotificationPublisher;

type SharedService<R, N> = State<Arc<PromotionService<R, N>>>;

/// Router builder exposing catalog, progress, essay and promotion endpoints.
pub fn promotion_router<R, N>(service: Arc<PromotionService<R, N>>) -> Router
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/programs",
            get(list_programs_handler::<R, N>).post(create_program_handler::<R, N>),
        )
        .route(
            "/api/v1/programs/:program_id/belts",
            post(add_belt_handler::<R, N>),
        )
        .route(
            "/api/v1/belts/:belt_id/requirements",
            post(add_requirement_handler::<R, N>),
        )
        .route("/api/v1/enrollments", post(enroll_handler::<R, N>))
        .route(
            "/api/v1/enrollments/:enrollment_id",
            delete(withdraw_handler::<R, N>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id/progress",
            get(progress_handler::<R, N>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id/requirements/:requirement_id",
            put(update_progress_handler::<R, N>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id/promotions",
            get(history_handler::<R, N>).post(promote_handler::<R, N>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_id/essays",
            get(list_essays_handler::<R, N>).post(submit_essay_handler::<R, N>),
        )
        .route(
            "/api/v1/essays/:essay_id/review",
            put(review_essay_handler::<R, N>),
        )
        .with_state(service)
}

fn respond<T: Serialize>(
    status: StatusCode,
    outcome: Result<T, PromotionServiceError>,
) -> Response {
    match outcome {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: PromotionServiceError) -> Response {
    let payload = json!({ "error": error.to_string() });
    (error.status_code(), Json(payload)).into_response()
}

fn caller_from(headers: &HeaderMap) -> Result<Caller, PromotionServiceError> {
    Caller::from_headers(headers).map_err(PromotionServiceError::from)
}

pub(crate) async fn list_programs_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Query(query): Query<ProgramQuery>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let outcome = caller_from(&headers).and_then(|caller| service.programs_for(&caller, query));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn create_program_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Json(request): Json<NewProgram>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let outcome = caller_from(&headers).and_then(|caller| service.create_program(&caller, request));
    respond(StatusCode::CREATED, outcome)
}

pub(crate) async fn add_belt_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(program_id): Path<String>,
    Json(request): Json<NewBelt>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let program_id = ProgramId::new(program_id);
    let outcome =
        caller_from(&headers).and_then(|caller| service.add_belt(&caller, &program_id, request));
    respond(StatusCode::CREATED, outcome)
}

pub(crate) async fn add_requirement_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(belt_id): Path<String>,
    Json(request): Json<NewRequirement>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let belt_id = BeltId::new(belt_id);
    let outcome = caller_from(&headers)
        .and_then(|caller| service.add_requirement(&caller, &belt_id, request));
    respond(StatusCode::CREATED, outcome)
}

pub(crate) async fn enroll_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Json(request): Json<EnrollmentRequest>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let outcome =
        caller_from(&headers).and_then(|caller| service.enroll(&caller, request, Utc::now()));
    respond(StatusCode::CREATED, outcome)
}

pub(crate) async fn withdraw_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let enrollment_id = EnrollmentId::new(enrollment_id);
    match caller_from(&headers).and_then(|caller| service.withdraw(&caller, &enrollment_id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn progress_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let enrollment_id = EnrollmentId::new(enrollment_id);
    let outcome =
        caller_from(&headers).and_then(|caller| service.evaluate(&caller, &enrollment_id));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn update_progress_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path((enrollment_id, requirement_id)): Path<(String, String)>,
    Json(update): Json<ProgressUpdate>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let enrollment_id = EnrollmentId::new(enrollment_id);
    let requirement_id = RequirementId::new(requirement_id);
    let outcome = caller_from(&headers).and_then(|caller| {
        service.update_progress(&caller, &enrollment_id, &requirement_id, update, Utc::now())
    });
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn promote_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
    Json(request): Json<PromotionRequest>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let enrollment_id = EnrollmentId::new(enrollment_id);
    let outcome = caller_from(&headers)
        .and_then(|caller| service.promote(&caller, &enrollment_id, request, Utc::now()));
    respond(StatusCode::CREATED, outcome)
}

pub(crate) async fn history_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let enrollment_id = EnrollmentId::new(enrollment_id);
    let outcome = caller_from(&headers)
        .and_then(|caller| service.promotion_history(&caller, &enrollment_id));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn submit_essay_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
    Json(submission): Json<EssaySubmission>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let enrollment_id = EnrollmentId::new(enrollment_id);
    let outcome = caller_from(&headers).and_then(|caller| {
        service.submit_essay(&caller, &enrollment_id, submission, Utc::now())
    });
    respond(StatusCode::CREATED, outcome)
}

pub(crate) async fn list_essays_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(enrollment_id): Path<String>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let enrollment_id = EnrollmentId::new(enrollment_id);
    let outcome = caller_from(&headers).and_then(|caller| service.essays(&caller, &enrollment_id));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn review_essay_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(essay_id): Path<String>,
    Json(request): Json<EssayReviewRequest>,
) -> Response
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let essay_id = EssayId::new(essay_id);
    let outcome = caller_from(&headers)
        .and_then(|caller| service.review_essay(&caller, &essay_id, request, Utc::now()));
    respond(StatusCode::OK, outcome)
}
