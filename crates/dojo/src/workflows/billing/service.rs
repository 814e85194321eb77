use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use super::domain::{
    AutoInvoiceSummary, BillingTerms, Invoice, InvoiceAction, InvoiceId, InvoiceStatus,
    MembershipPlan, NewPlan, PlanId, SchoolBillingSettings, Subscription, SubscriptionAction,
    SubscriptionId, SubscriptionRequest, SubscriptionStatus,
};
use super::repository::{BillingRepository, RepositoryError};
use super::scheduler::{announce, AutoInvoiceScheduler, BillingDefaults};
use crate::workflows::access::{authorize, AccessDenied, Action, Caller, ResourceScope};
use crate::workflows::ids::{SchoolId, StudentId};
use crate::workflows::notify::NotificationPublisher;
use crate::workflows::roster::StudentDirectory;

const MAX_TAX_RATE_BPS: u32 = 10_000;

/// Service covering membership plans, subscriptions, invoices and the auto-invoice trigger.
pub struct BillingService<R, N> {
    repository: Arc<R>,
    roster: Arc<dyn StudentDirectory>,
    notifier: Arc<N>,
    scheduler: AutoInvoiceScheduler<R, N>,
}

impl<R, N> BillingService<R, N>
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(
        repository: Arc<R>,
        roster: Arc<dyn StudentDirectory>,
        notifier: Arc<N>,
        defaults: BillingDefaults,
    ) -> Self {
        let scheduler = AutoInvoiceScheduler::new(repository.clone(), notifier.clone(), defaults);
        Self {
            repository,
            roster,
            notifier,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &AutoInvoiceScheduler<R, N> {
        &self.scheduler
    }

    pub fn create_plan(
        &self,
        caller: &Caller,
        request: NewPlan,
    ) -> Result<MembershipPlan, BillingServiceError> {
        let school_id = request
            .school_id
            .or_else(|| caller.school_id.clone())
            .ok_or_else(|| BillingServiceError::Validation("plan needs a school".into()))?;
        authorize(
            caller,
            Action::ManageBilling,
            &ResourceScope::School(school_id.clone()),
        )?;

        let name = request.name.trim();
        if name.is_empty() {
            return Err(BillingServiceError::Validation("plan name is required".into()));
        }

        let plan = self.repository.insert_plan(MembershipPlan {
            id: PlanId::mint(),
            school_id,
            name: name.to_string(),
            price_cents: request.price_cents,
            billing_cycle: request.billing_cycle,
            is_active: true,
        })?;
        info!(plan = %plan.id, cycle = plan.billing_cycle.label(), "membership plan created");
        Ok(plan)
    }

    /// Store a school's own grace period, tax rate and due terms.
    pub fn configure_school(
        &self,
        caller: &Caller,
        settings: SchoolBillingSettings,
    ) -> Result<SchoolBillingSettings, BillingServiceError> {
        authorize(
            caller,
            Action::ManageBilling,
            &ResourceScope::School(settings.school_id.clone()),
        )?;
        if settings.terms.tax_rate_bps > MAX_TAX_RATE_BPS {
            return Err(BillingServiceError::Validation(format!(
                "tax rate must be at most {MAX_TAX_RATE_BPS} basis points"
            )));
        }
        Ok(self.repository.save_settings(settings)?)
    }

    /// Terms in force for `school_id`, falling back to the configured defaults.
    pub fn terms_for(&self, school_id: &SchoolId) -> Result<BillingTerms, BillingServiceError> {
        Ok(self
            .repository
            .settings(school_id)?
            .map(|settings| settings.terms)
            .unwrap_or(self.scheduler.defaults().terms))
    }

    /// Start an ACTIVE subscription for a student on the plan school's roster; the first
    /// invoice falls due on the start date.
    pub fn subscribe(
        &self,
        caller: &Caller,
        request: SubscriptionRequest,
        today: NaiveDate,
    ) -> Result<Subscription, BillingServiceError> {
        let plan = self
            .repository
            .plan(&request.plan_id)?
            .ok_or(BillingServiceError::NotFound("plan"))?;
        authorize(
            caller,
            Action::ManageBilling,
            &ResourceScope::School(plan.school_id.clone()),
        )?;
        let student = self
            .roster
            .student(&request.student_id)?
            .filter(|student| student.school_id == plan.school_id)
            .ok_or(BillingServiceError::NotFound("student"))?;
        if !plan.is_active {
            return Err(BillingServiceError::Validation(format!(
                "plan {} is no longer offered",
                plan.name
            )));
        }

        let start_date = request.start_date.unwrap_or(today);
        let subscription = Subscription {
            id: SubscriptionId::mint(),
            student_id: student.id,
            school_id: plan.school_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Active,
            start_date,
            next_invoice_date: start_date,
            last_invoice_date: None,
            invoices_generated: 0,
        };

        match self.repository.insert_subscription(subscription) {
            Ok(subscription) => {
                info!(
                    subscription = %subscription.id,
                    student = %subscription.student_id,
                    "subscription started"
                );
                Ok(subscription)
            }
            Err(RepositoryError::Conflict) => Err(BillingServiceError::Validation(
                "student already holds a subscription to this plan".into(),
            )),
            Err(other) => Err(other.into()),
        }
    }

    /// Pause, resume or cancel. Resuming never back-bills the paused period.
    pub fn change_subscription(
        &self,
        caller: &Caller,
        subscription_id: &SubscriptionId,
        action: SubscriptionAction,
        today: NaiveDate,
    ) -> Result<Subscription, BillingServiceError> {
        let current = self
            .repository
            .subscription(subscription_id)?
            .ok_or(BillingServiceError::NotFound("subscription"))?;
        authorize(
            caller,
            Action::ManageBilling,
            &ResourceScope::School(current.school_id.clone()),
        )?;

        let (expected, next, next_invoice_date) = match action {
            SubscriptionAction::Pause => (
                vec![SubscriptionStatus::Active],
                SubscriptionStatus::Paused,
                None,
            ),
            SubscriptionAction::Resume => (
                vec![SubscriptionStatus::Paused],
                SubscriptionStatus::Active,
                self.resume_date(&current, today)?,
            ),
            SubscriptionAction::Cancel => (
                vec![SubscriptionStatus::Active, SubscriptionStatus::Paused],
                SubscriptionStatus::Cancelled,
                None,
            ),
        };

        let updated = self
            .repository
            .transition_subscription(subscription_id, &expected, next, next_invoice_date)?
            .ok_or(BillingServiceError::InvalidTransition {
                from: current.status.label(),
                to: next.label(),
            })?;
        info!(
            subscription = %updated.id,
            status = updated.status.label(),
            "subscription updated"
        );
        Ok(updated)
    }

    /// A subscription whose next invoice date passed while paused restarts at the first
    /// cycle boundary on or after `today`.
    fn resume_date(
        &self,
        subscription: &Subscription,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>, BillingServiceError> {
        if subscription.next_invoice_date >= today {
            return Ok(None);
        }
        let plan = self
            .repository
            .plan(&subscription.plan_id)?
            .ok_or(BillingServiceError::NotFound("plan"))?;
        let yesterday = today.pred_opt().unwrap_or(today);
        Ok(plan
            .billing_cycle
            .next_boundary(subscription.start_date, yesterday))
    }

    /// A student's invoices with their current school, oldest number first.
    pub fn invoices_for_student(
        &self,
        caller: &Caller,
        student_id: &StudentId,
    ) -> Result<Vec<Invoice>, BillingServiceError> {
        let student = self
            .roster
            .student(student_id)?
            .ok_or(BillingServiceError::NotFound("student"))?;
        authorize(
            caller,
            Action::ViewBilling,
            &ResourceScope::Student {
                school_id: student.school_id.clone(),
                student_id: student.id,
            },
        )?;

        let invoices = self.repository.invoices_for_student(student_id)?;
        Ok(invoices
            .into_iter()
            .filter(|invoice| invoice.school_id == student.school_id)
            .collect())
    }

    /// Send, record payment, void or refund an invoice.
    pub fn apply_invoice_action(
        &self,
        caller: &Caller,
        invoice_id: &InvoiceId,
        action: InvoiceAction,
        at: DateTime<Utc>,
    ) -> Result<Invoice, BillingServiceError> {
        let current = self
            .repository
            .invoice(invoice_id)?
            .ok_or(BillingServiceError::NotFound("invoice"))?;
        authorize(
            caller,
            Action::ManageBilling,
            &ResourceScope::School(current.school_id.clone()),
        )?;

        let next = action.target();
        let expected = InvoiceStatus::sources_of(next);
        let updated = self
            .repository
            .transition_invoice(invoice_id, &expected, next, at)?
            .ok_or(BillingServiceError::InvalidTransition {
                from: current.status.label(),
                to: next.label(),
            })?;

        if action == InvoiceAction::Send {
            announce(self.notifier.as_ref(), &updated, "invoice_issued");
        }
        info!(
            invoice = %updated.invoice_number,
            status = updated.status.label(),
            "invoice updated"
        );
        Ok(updated)
    }

    /// On-demand auto-invoice run; platform super admins only.
    pub fn trigger_auto_invoice(
        &self,
        caller: &Caller,
        today: NaiveDate,
    ) -> Result<AutoInvoiceSummary, BillingServiceError> {
        authorize(caller, Action::RunAutoInvoice, &ResourceScope::Platform)?;
        info!(by = %caller.user_id, %today, "manual auto-invoice run requested");
        Ok(self.scheduler.run(today)?)
    }
}

/// Error raised by the billing service.
#[derive(Debug, thiserror::Error)]
pub enum BillingServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Forbidden(#[from] AccessDenied),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl BillingServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingServiceError::Forbidden(AccessDenied::Unauthenticated(_)) => {
                StatusCode::UNAUTHORIZED
            }
            BillingServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            BillingServiceError::NotFound(_)
            | BillingServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            BillingServiceError::InvalidTransition { .. }
            | BillingServiceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            BillingServiceError::Repository(RepositoryError::Unavailable(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
