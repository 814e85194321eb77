use chrono::{DateTime, NaiveDate, Utc};

use super::domain::{
    Invoice, InvoiceId, InvoiceStatus, MembershipPlan, PlanId, SchoolBillingSettings,
    Subscription, SubscriptionId, SubscriptionStatus,
};
use crate::workflows::ids::{SchoolId, StudentId};
pub use crate::workflows::storage::RepositoryError;

/// Invoice fields chosen by the caller; the store assigns the id and invoice number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDraft {
    pub school_id: SchoolId,
    pub student_id: StudentId,
    pub plan_id: Option<PlanId>,
    pub subscription_id: Option<SubscriptionId>,
    pub subtotal_cents: u64,
    pub tax_cents: u64,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub period_start: Option<NaiveDate>,
    pub due_date: NaiveDate,
}

/// One compare-and-advance of a subscription's billing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleClaim {
    pub subscription_id: SubscriptionId,
    /// `next_invoice_date` as read by the claimant.
    pub observed_next_invoice_date: NaiveDate,
    pub advance_to: NaiveDate,
    pub as_of: NaiveDate,
    pub invoice: InvoiceDraft,
}

/// Storage abstraction for plans, subscriptions, invoices and school billing settings.
pub trait BillingRepository: Send + Sync {
    fn insert_plan(&self, plan: MembershipPlan) -> Result<MembershipPlan, RepositoryError>;
    fn plan(&self, id: &PlanId) -> Result<Option<MembershipPlan>, RepositoryError>;

    fn settings(&self, school_id: &SchoolId)
        -> Result<Option<SchoolBillingSettings>, RepositoryError>;
    fn save_settings(
        &self,
        settings: SchoolBillingSettings,
    ) -> Result<SchoolBillingSettings, RepositoryError>;

    /// Fails with `Conflict` when the student already holds a live subscription to the plan.
    fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, RepositoryError>;
    fn subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>, RepositoryError>;
    /// ACTIVE subscriptions whose `next_invoice_date` is on or before `today`.
    fn due_subscriptions(&self, today: NaiveDate) -> Result<Vec<Subscription>, RepositoryError>;
    /// Conditional status change; `Ok(None)` when the current status is not in `expected`.
    fn transition_subscription(
        &self,
        id: &SubscriptionId,
        expected: &[SubscriptionStatus],
        next: SubscriptionStatus,
        next_invoice_date: Option<NaiveDate>,
    ) -> Result<Option<Subscription>, RepositoryError>;

    /// Atomically advance `next_invoice_date` and insert the cycle's invoice.
    ///
    /// Returns `Ok(None)` without writing when the subscription is no longer ACTIVE, its
    /// `next_invoice_date` differs from the observed value, or that date is after `as_of`.
    fn claim_cycle(&self, claim: CycleClaim) -> Result<Option<Invoice>, RepositoryError>;

    fn invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError>;
    fn invoices_for_student(&self, student_id: &StudentId)
        -> Result<Vec<Invoice>, RepositoryError>;
    fn invoices_with_status(&self, status: InvoiceStatus)
        -> Result<Vec<Invoice>, RepositoryError>;
    /// Conditional status change; `Ok(None)` when the current status is not in `expected`.
    /// Moving to PAID stamps `paid_at`.
    fn transition_invoice(
        &self,
        id: &InvoiceId,
        expected: &[InvoiceStatus],
        next: InvoiceStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Invoice>, RepositoryError>;
}
