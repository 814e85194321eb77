use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::ids::{string_id, SchoolId, StudentId};

string_id!(
    /// Membership plan offered by a school.
    PlanId,
    "plan"
);
string_id!(SubscriptionId, "sub");
string_id!(InvoiceId, "inv");

/// Recurrence of a membership plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

enum CycleStep {
    Days(u64),
    Months(u32),
}

impl BillingCycle {
    pub const fn label(self) -> &'static str {
        match self {
            BillingCycle::Weekly => "WEEKLY",
            BillingCycle::Biweekly => "BIWEEKLY",
            BillingCycle::Monthly => "MONTHLY",
            BillingCycle::Quarterly => "QUARTERLY",
            BillingCycle::SemiAnnual => "SEMI_ANNUAL",
            BillingCycle::Annual => "ANNUAL",
        }
    }

    const fn step(self) -> CycleStep {
        match self {
            BillingCycle::Weekly => CycleStep::Days(7),
            BillingCycle::Biweekly => CycleStep::Days(14),
            BillingCycle::Monthly => CycleStep::Months(1),
            BillingCycle::Quarterly => CycleStep::Months(3),
            BillingCycle::SemiAnnual => CycleStep::Months(6),
            BillingCycle::Annual => CycleStep::Months(12),
        }
    }

    /// The `index`-th boundary counted from `anchor`.
    ///
    /// Month steps are always added to the anchor rather than to the previous boundary, so a
    /// subscription starting on the 31st bills on the last day of short months and returns
    /// to the 31st afterwards.
    pub fn boundary(self, anchor: NaiveDate, index: u32) -> Option<NaiveDate> {
        match self.step() {
            CycleStep::Days(days) => {
                anchor.checked_add_days(Days::new(days.saturating_mul(u64::from(index))))
            }
            CycleStep::Months(months) => {
                anchor.checked_add_months(Months::new(months.checked_mul(index)?))
            }
        }
    }

    /// First boundary strictly after `after`. Dates before the anchor yield the anchor itself.
    pub fn next_boundary(self, anchor: NaiveDate, after: NaiveDate) -> Option<NaiveDate> {
        if after < anchor {
            return Some(anchor);
        }

        let mut index = match self.step() {
            CycleStep::Days(days) => {
                let elapsed = u64::try_from((after - anchor).num_days()).ok()?;
                u32::try_from(elapsed / days).ok()?
            }
            CycleStep::Months(months) => {
                let elapsed = (after.year() - anchor.year()) * 12 + after.month() as i32
                    - anchor.month() as i32;
                u32::try_from(elapsed).ok()? / months
            }
        };

        loop {
            let candidate = self.boundary(anchor, index)?;
            if candidate > after {
                return Some(candidate);
            }
            index = index.checked_add(1)?;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    PastDue,
    Cancelled,
    Refunded,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Paid,
        InvoiceStatus::PastDue,
        InvoiceStatus::Cancelled,
        InvoiceStatus::Refunded,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::PastDue => "PAST_DUE",
            InvoiceStatus::Cancelled => "CANCELLED",
            InvoiceStatus::Refunded => "REFUNDED",
        }
    }

    pub const fn can_transition_to(self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Draft, InvoiceStatus::Sent)
                | (
                    InvoiceStatus::Draft | InvoiceStatus::Sent | InvoiceStatus::PastDue,
                    InvoiceStatus::Cancelled
                )
                | (InvoiceStatus::Sent | InvoiceStatus::PastDue, InvoiceStatus::Paid)
                | (InvoiceStatus::Sent, InvoiceStatus::PastDue)
                | (InvoiceStatus::Paid, InvoiceStatus::Refunded)
        )
    }

    /// Every status from which `next` is reachable in one step.
    pub fn sources_of(next: InvoiceStatus) -> Vec<InvoiceStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPlan {
    pub id: PlanId,
    pub school_id: SchoolId,
    pub name: String,
    pub price_cents: u64,
    pub billing_cycle: BillingCycle,
    pub is_active: bool,
}

/// Recurring billing relationship. `next_invoice_date` is the idempotence key for auto-invoicing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub start_date: NaiveDate,
    pub next_invoice_date: NaiveDate,
    pub last_invoice_date: Option<NaiveDate>,
    pub invoices_generated: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub school_id: SchoolId,
    pub student_id: StudentId,
    pub plan_id: Option<PlanId>,
    pub subscription_id: Option<SubscriptionId>,
    pub subtotal_cents: u64,
    pub tax_cents: u64,
    pub total_cents: u64,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    /// Billing period the invoice covers, for subscription invoices.
    pub period_start: Option<NaiveDate>,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Per-school billing terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingTerms {
    pub grace_period_days: u32,
    pub tax_rate_bps: u32,
    pub invoice_due_days: u32,
}

impl BillingTerms {
    /// Tax in cents, rounded half up.
    pub fn tax_on(&self, subtotal_cents: u64) -> u64 {
        subtotal_cents
            .saturating_mul(u64::from(self.tax_rate_bps))
            .saturating_add(5_000)
            / 10_000
    }

    pub fn due_date(&self, issued: NaiveDate) -> NaiveDate {
        issued
            .checked_add_days(Days::new(u64::from(self.invoice_due_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Past due once `today` is strictly later than the due date plus the grace period.
    pub fn is_overdue(&self, due_date: NaiveDate, today: NaiveDate) -> bool {
        due_date
            .checked_add_days(Days::new(u64::from(self.grace_period_days)))
            .is_some_and(|deadline| today > deadline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolBillingSettings {
    pub school_id: SchoolId,
    #[serde(flatten)]
    pub terms: BillingTerms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub price_cents: u64,
    pub billing_cycle: BillingCycle,
    /// Super admins name the school explicitly; staff default to their own.
    #[serde(default)]
    pub school_id: Option<SchoolId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub student_id: StudentId,
    pub plan_id: PlanId,
    /// Defaults to the day the request is processed.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Pause,
    Resume,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceAction {
    Send,
    Pay,
    Void,
    Refund,
}

impl InvoiceAction {
    pub const fn target(self) -> InvoiceStatus {
        match self {
            InvoiceAction::Send => InvoiceStatus::Sent,
            InvoiceAction::Pay => InvoiceStatus::Paid,
            InvoiceAction::Void => InvoiceStatus::Cancelled,
            InvoiceAction::Refund => InvoiceStatus::Refunded,
        }
    }
}

/// Outcome of one auto-invoice run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoInvoiceSummary {
    pub invoices_generated: u32,
    pub overdue_marked: u32,
    pub subscriptions_skipped: u32,
}
