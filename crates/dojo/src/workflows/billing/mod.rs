//! Membership plans, subscriptions, invoices and the monthly auto-invoice job.

pub mod domain;
pub mod repository;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use domain::{
    AutoInvoiceSummary, BillingCycle, BillingTerms, Invoice, InvoiceAction, InvoiceId,
    InvoiceStatus, MembershipPlan, NewPlan, PlanId, SchoolBillingSettings, Subscription,
    SubscriptionAction, SubscriptionId, SubscriptionRequest, SubscriptionStatus,
};
pub use repository::{BillingRepository, CycleClaim, InvoiceDraft, RepositoryError};
pub use router::{billing_router, AutoInvoiceRequest};
pub use scheduler::{next_scheduled_run, AutoInvoiceScheduler, BillingDefaults};
pub use service::{BillingService, BillingServiceError};
pub use store::InMemoryBillingStore;
