//! Monthly auto-invoice job.
//!
//! The job holds no lock of its own. Each subscription cycle is claimed through
//! [`BillingRepository::claim_cycle`], so a manual trigger racing the timer can only ever
//! produce one invoice per cycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use tracing::{debug, info, warn};

use super::domain::{
    AutoInvoiceSummary, BillingTerms, Invoice, InvoiceStatus, MembershipPlan, Subscription,
};
use super::repository::{BillingRepository, CycleClaim, InvoiceDraft, RepositoryError};
use crate::config::BillingConfig;
use crate::workflows::ids::SchoolId;
use crate::workflows::notify::{dispatch, Notification, NotificationPublisher};

/// Terms applied to schools without stored settings, plus the send policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingDefaults {
    pub terms: BillingTerms,
    pub auto_send_invoices: bool,
}

impl From<&BillingConfig> for BillingDefaults {
    fn from(config: &BillingConfig) -> Self {
        Self {
            terms: BillingTerms {
                grace_period_days: config.grace_period_days,
                tax_rate_bps: config.tax_rate_bps,
                invoice_due_days: config.invoice_due_days,
            },
            auto_send_invoices: config.auto_send_invoices,
        }
    }
}

impl Default for BillingDefaults {
    fn default() -> Self {
        Self::from(&BillingConfig::default())
    }
}

/// The first of the month following `after`, when the timer should fire next.
pub fn next_scheduled_run(after: NaiveDate) -> Option<NaiveDate> {
    after.with_day(1)?.checked_add_months(Months::new(1))
}

pub struct AutoInvoiceScheduler<R, N> {
    repository: Arc<R>,
    notifier: Arc<N>,
    defaults: BillingDefaults,
}

impl<R, N> AutoInvoiceScheduler<R, N>
where
    R: BillingRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(repository: Arc<R>, notifier: Arc<N>, defaults: BillingDefaults) -> Self {
        Self {
            repository,
            notifier,
            defaults,
        }
    }

    pub fn defaults(&self) -> BillingDefaults {
        self.defaults
    }

    /// Invoice every due subscription and flag overdue invoices as of `today`.
    pub fn run(&self, today: NaiveDate) -> Result<AutoInvoiceSummary, RepositoryError> {
        let mut summary = AutoInvoiceSummary::default();
        let mut terms_cache: HashMap<SchoolId, BillingTerms> = HashMap::new();

        for subscription in self.repository.due_subscriptions(today)? {
            let Some(plan) = self.repository.plan(&subscription.plan_id)? else {
                warn!(
                    subscription = %subscription.id,
                    plan = %subscription.plan_id,
                    "subscription references a missing plan; skipped"
                );
                summary.subscriptions_skipped += 1;
                continue;
            };
            let terms = self.terms_for(&mut terms_cache, &subscription.school_id)?;
            summary.invoices_generated +=
                self.bill_due_cycles(&subscription, &plan, terms, today)?;
        }

        summary.overdue_marked = self.mark_overdue(&mut terms_cache, today)?;

        info!(
            %today,
            invoices_generated = summary.invoices_generated,
            overdue_marked = summary.overdue_marked,
            skipped = summary.subscriptions_skipped,
            "auto-invoice run complete"
        );
        Ok(summary)
    }

    /// Claim each elapsed cycle in turn. Stops at the first lost claim: another run billed the
    /// cycle, or the subscription was paused or cancelled after it was read.
    fn bill_due_cycles(
        &self,
        subscription: &Subscription,
        plan: &MembershipPlan,
        terms: BillingTerms,
        today: NaiveDate,
    ) -> Result<u32, RepositoryError> {
        let mut generated = 0;
        let mut observed = subscription.next_invoice_date;

        while observed <= today {
            let Some(advance_to) = plan
                .billing_cycle
                .next_boundary(subscription.start_date, observed)
            else {
                warn!(subscription = %subscription.id, "billing cycle overflowed the calendar");
                break;
            };

            let claim = CycleClaim {
                subscription_id: subscription.id.clone(),
                observed_next_invoice_date: observed,
                advance_to,
                as_of: today,
                invoice: self.draft(subscription, plan, terms, observed, today),
            };

            match self.repository.claim_cycle(claim)? {
                Some(invoice) => {
                    debug!(
                        subscription = %subscription.id,
                        invoice = %invoice.invoice_number,
                        period_start = %observed,
                        next_invoice_date = %advance_to,
                        "subscription cycle invoiced"
                    );
                    announce(self.notifier.as_ref(), &invoice, "invoice_issued");
                    generated += 1;
                }
                None => {
                    let status = self
                        .repository
                        .subscription(&subscription.id)?
                        .map_or("MISSING", |current| current.status.label());
                    debug!(
                        subscription = %subscription.id,
                        observed = %observed,
                        status,
                        "cycle claim lost; subscription changed since it was read"
                    );
                    break;
                }
            }
            observed = advance_to;
        }

        Ok(generated)
    }

    fn draft(
        &self,
        subscription: &Subscription,
        plan: &MembershipPlan,
        terms: BillingTerms,
        period_start: NaiveDate,
        today: NaiveDate,
    ) -> InvoiceDraft {
        let status = if self.defaults.auto_send_invoices {
            InvoiceStatus::Sent
        } else {
            InvoiceStatus::Draft
        };

        InvoiceDraft {
            school_id: subscription.school_id.clone(),
            student_id: subscription.student_id.clone(),
            plan_id: Some(plan.id.clone()),
            subscription_id: Some(subscription.id.clone()),
            subtotal_cents: plan.price_cents,
            tax_cents: terms.tax_on(plan.price_cents),
            status,
            issue_date: today,
            period_start: Some(period_start),
            due_date: terms.due_date(today),
        }
    }

    fn mark_overdue(
        &self,
        terms_cache: &mut HashMap<SchoolId, BillingTerms>,
        today: NaiveDate,
    ) -> Result<u32, RepositoryError> {
        let stamp = today.and_time(NaiveTime::MIN).and_utc();
        let mut marked = 0;

        for invoice in self.repository.invoices_with_status(InvoiceStatus::Sent)? {
            let terms = self.terms_for(terms_cache, &invoice.school_id)?;
            if !terms.is_overdue(invoice.due_date, today) {
                continue;
            }
            if let Some(updated) = self.repository.transition_invoice(
                &invoice.id,
                &[InvoiceStatus::Sent],
                InvoiceStatus::PastDue,
                stamp,
            )? {
                announce(self.notifier.as_ref(), &updated, "invoice_past_due");
                marked += 1;
            }
        }

        Ok(marked)
    }

    fn terms_for(
        &self,
        cache: &mut HashMap<SchoolId, BillingTerms>,
        school_id: &SchoolId,
    ) -> Result<BillingTerms, RepositoryError> {
        if let Some(terms) = cache.get(school_id) {
            return Ok(*terms);
        }
        let terms = self
            .repository
            .settings(school_id)?
            .map(|settings| settings.terms)
            .unwrap_or(self.defaults.terms);
        cache.insert(school_id.clone(), terms);
        Ok(terms)
    }
}

/// Tell the student about an invoice. Drafts stay internal until sent.
pub(super) fn announce<N>(notifier: &N, invoice: &Invoice, template: &str)
where
    N: NotificationPublisher + ?Sized,
{
    if invoice.status == InvoiceStatus::Draft {
        return;
    }
    let notice = Notification::new(template, invoice.id.as_str())
        .with_detail("invoice_number", invoice.invoice_number.as_str())
        .with_detail("student_id", invoice.student_id.as_str())
        .with_detail("total_cents", invoice.total_cents.to_string());
    dispatch(notifier, notice);
}
