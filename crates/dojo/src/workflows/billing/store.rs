use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};

use super::domain::{
    Invoice, InvoiceId, InvoiceStatus, MembershipPlan, PlanId, SchoolBillingSettings,
    Subscription, SubscriptionId, SubscriptionStatus,
};
use super::repository::{BillingRepository, CycleClaim, RepositoryError};
use crate::workflows::ids::{SchoolId, StudentId};

#[derive(Debug, Default)]
struct BillingTables {
    plans: HashMap<PlanId, MembershipPlan>,
    settings: HashMap<SchoolId, SchoolBillingSettings>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    invoices: BTreeMap<InvoiceId, Invoice>,
    last_invoice_number: u64,
}

/// Mutex-guarded billing store. Every method is one critical section, which is what makes
/// `claim_cycle` a true compare-and-advance.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBillingStore {
    tables: Arc<Mutex<BillingTables>>,
}

impl InMemoryBillingStore {
    fn tables(&self) -> Result<MutexGuard<'_, BillingTables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("billing store mutex poisoned".to_string()))
    }
}

impl BillingRepository for InMemoryBillingStore {
    fn insert_plan(&self, plan: MembershipPlan) -> Result<MembershipPlan, RepositoryError> {
        let mut tables = self.tables()?;
        if tables.plans.contains_key(&plan.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.plans.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    fn plan(&self, id: &PlanId) -> Result<Option<MembershipPlan>, RepositoryError> {
        Ok(self.tables()?.plans.get(id).cloned())
    }

    fn settings(
        &self,
        school_id: &SchoolId,
    ) -> Result<Option<SchoolBillingSettings>, RepositoryError> {
        Ok(self.tables()?.settings.get(school_id).cloned())
    }

    fn save_settings(
        &self,
        settings: SchoolBillingSettings,
    ) -> Result<SchoolBillingSettings, RepositoryError> {
        self.tables()?
            .settings
            .insert(settings.school_id.clone(), settings.clone());
        Ok(settings)
    }

    fn insert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, RepositoryError> {
        let mut tables = self.tables()?;
        let duplicate = tables.subscriptions.values().any(|existing| {
            existing.student_id == subscription.student_id
                && existing.plan_id == subscription.plan_id
                && existing.status != SubscriptionStatus::Cancelled
        });
        if duplicate || tables.subscriptions.contains_key(&subscription.id) {
            return Err(RepositoryError::Conflict);
        }
        tables
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    fn subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>, RepositoryError> {
        Ok(self.tables()?.subscriptions.get(id).cloned())
    }

    fn due_subscriptions(&self, today: NaiveDate) -> Result<Vec<Subscription>, RepositoryError> {
        Ok(self
            .tables()?
            .subscriptions
            .values()
            .filter(|subscription| {
                subscription.status == SubscriptionStatus::Active
                    && subscription.next_invoice_date <= today
            })
            .cloned()
            .collect())
    }

    fn transition_subscription(
        &self,
        id: &SubscriptionId,
        expected: &[SubscriptionStatus],
        next: SubscriptionStatus,
        next_invoice_date: Option<NaiveDate>,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let mut tables = self.tables()?;
        let subscription = tables
            .subscriptions
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        if !expected.contains(&subscription.status) {
            return Ok(None);
        }
        subscription.status = next;
        if let Some(date) = next_invoice_date {
            subscription.next_invoice_date = date;
        }
        Ok(Some(subscription.clone()))
    }

    fn claim_cycle(&self, claim: CycleClaim) -> Result<Option<Invoice>, RepositoryError> {
        let mut tables = self.tables()?;
        let tables = &mut *tables;

        let subscription = tables
            .subscriptions
            .get_mut(&claim.subscription_id)
            .ok_or(RepositoryError::NotFound)?;
        if subscription.status != SubscriptionStatus::Active
            || subscription.next_invoice_date != claim.observed_next_invoice_date
            || subscription.next_invoice_date > claim.as_of
        {
            return Ok(None);
        }

        subscription.next_invoice_date = claim.advance_to;
        subscription.last_invoice_date = Some(claim.invoice.issue_date);
        subscription.invoices_generated += 1;

        tables.last_invoice_number += 1;
        let draft = claim.invoice;
        let invoice = Invoice {
            id: InvoiceId::mint(),
            invoice_number: format!("INV-{:06}", tables.last_invoice_number),
            school_id: draft.school_id,
            student_id: draft.student_id,
            plan_id: draft.plan_id,
            subscription_id: draft.subscription_id,
            subtotal_cents: draft.subtotal_cents,
            tax_cents: draft.tax_cents,
            total_cents: draft.subtotal_cents.saturating_add(draft.tax_cents),
            status: draft.status,
            issue_date: draft.issue_date,
            period_start: draft.period_start,
            due_date: draft.due_date,
            paid_at: None,
        };
        tables.invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(Some(invoice))
    }

    fn invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError> {
        Ok(self.tables()?.invoices.get(id).cloned())
    }

    fn invoices_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        let mut invoices: Vec<Invoice> = self
            .tables()?
            .invoices
            .values()
            .filter(|invoice| &invoice.student_id == student_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));
        Ok(invoices)
    }

    fn invoices_with_status(
        &self,
        status: InvoiceStatus,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        Ok(self
            .tables()?
            .invoices
            .values()
            .filter(|invoice| invoice.status == status)
            .cloned()
            .collect())
    }

    fn transition_invoice(
        &self,
        id: &InvoiceId,
        expected: &[InvoiceStatus],
        next: InvoiceStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Invoice>, RepositoryError> {
        let mut tables = self.tables()?;
        let invoice = tables
            .invoices
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        if !expected.contains(&invoice.status) {
            return Ok(None);
        }
        invoice.status = next;
        if next == InvoiceStatus::Paid {
            invoice.paid_at = Some(at);
        }
        Ok(Some(invoice.clone()))
    }
}
