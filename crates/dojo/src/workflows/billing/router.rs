use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    InvoiceAction, InvoiceId, NewPlan, SchoolBillingSettings, SubscriptionAction, SubscriptionId,
    SubscriptionRequest,
};
use super::repository::BillingRepository;
use super::service::{BillingService, BillingServiceError};
use crate::workflows::access::Caller;
use crate::workflows::ids::StudentId;
use crate::workflows::notify::NotificationPublisher;

type SharedService<R, N> = State<Arc<BillingService<R, N>>>;

/// Body of the on-demand auto-invoice trigger; `today` defaults to the current UTC date.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutoInvoiceRequest {
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

/// Router builder exposing plan, subscription, invoice and auto-invoice endpoints.
pub fn billing_router<R, N>(service: Arc<BillingService<R, N>>) -> Router
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route("/api/v1/billing/plans", post(create_plan_handler::<R, N>))
        .route("/api/v1/billing/settings", put(settings_handler::<R, N>))
        .route(
            "/api/v1/billing/subscriptions",
            post(subscribe_handler::<R, N>),
        )
        .route(
            "/api/v1/billing/subscriptions/:subscription_id/:action",
            post(subscription_action_handler::<R, N>),
        )
        .route(
            "/api/v1/billing/students/:student_id/invoices",
            get(student_invoices_handler::<R, N>),
        )
        .route(
            "/api/v1/billing/invoices/:invoice_id/:action",
            post(invoice_action_handler::<R, N>),
        )
        .route(
            "/api/v1/billing/auto-invoice",
            post(auto_invoice_handler::<R, N>),
        )
        .with_state(service)
}

fn respond<T: Serialize>(status: StatusCode, outcome: Result<T, BillingServiceError>) -> Response {
    match outcome {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => {
            let payload = json!({ "error": error.to_string() });
            (error.status_code(), Json(payload)).into_response()
        }
    }
}

fn caller_from(headers: &HeaderMap) -> Result<Caller, BillingServiceError> {
    Caller::from_headers(headers).map_err(BillingServiceError::from)
}

pub(crate) async fn create_plan_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Json(request): Json<NewPlan>,
) -> Response
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let outcome = caller_from(&headers).and_then(|caller| service.create_plan(&caller, request));
    respond(StatusCode::CREATED, outcome)
}

pub(crate) async fn settings_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Json(settings): Json<SchoolBillingSettings>,
) -> Response
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let outcome =
        caller_from(&headers).and_then(|caller| service.configure_school(&caller, settings));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn subscribe_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Json(request): Json<SubscriptionRequest>,
) -> Response
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let today = Utc::now().date_naive();
    let outcome =
        caller_from(&headers).and_then(|caller| service.subscribe(&caller, request, today));
    respond(StatusCode::CREATED, outcome)
}

pub(crate) async fn subscription_action_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path((subscription_id, action)): Path<(String, SubscriptionAction)>,
) -> Response
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let subscription_id = SubscriptionId::new(subscription_id);
    let today = Utc::now().date_naive();
    let outcome = caller_from(&headers).and_then(|caller| {
        service.change_subscription(&caller, &subscription_id, action, today)
    });
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn student_invoices_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
) -> Response
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let student_id = StudentId::new(student_id);
    let outcome = caller_from(&headers)
        .and_then(|caller| service.invoices_for_student(&caller, &student_id));
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn invoice_action_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Path((invoice_id, action)): Path<(String, InvoiceAction)>,
) -> Response
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let invoice_id = InvoiceId::new(invoice_id);
    let outcome = caller_from(&headers).and_then(|caller| {
        service.apply_invoice_action(&caller, &invoice_id, action, Utc::now())
    });
    respond(StatusCode::OK, outcome)
}

pub(crate) async fn auto_invoice_handler<R, N>(
    State(service): SharedService<R, N>,
    headers: HeaderMap,
    Json(request): Json<AutoInvoiceRequest>,
) -> Response
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let today = request.today.unwrap_or_else(|| Utc::now().date_naive());
    let outcome =
        caller_from(&headers).and_then(|caller| service.trigger_auto_invoice(&caller, today));
    respond(StatusCode::OK, outcome)
}
