use chrono::NaiveDate;
use dojo::workflows::billing::{BillingDefaults, BillingService, InMemoryBillingStore};
use dojo::workflows::notify::NotificationPublisher;
use dojo::workflows::promotion::{InMemoryPromotionStore, PromotionService};
use dojo::workflows::roster::InMemoryRoster;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) type Promotion<N> = PromotionService<InMemoryPromotionStore, N>;
pub(crate) type Billing<N> = BillingService<InMemoryBillingStore, N>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Both workflows wired to in-memory stores, one shared roster and one publisher.
pub(crate) struct Workflows<N> {
    pub(crate) roster: Arc<InMemoryRoster>,
    pub(crate) promotion: Arc<Promotion<N>>,
    pub(crate) billing: Arc<Billing<N>>,
    pub(crate) notifier: Arc<N>,
}

impl<N> Workflows<N>
where
    N: NotificationPublisher + 'static,
{
    pub(crate) fn in_memory(notifier: Arc<N>, defaults: BillingDefaults) -> Self {
        let roster = Arc::new(InMemoryRoster::default());

        Self {
            promotion: Arc::new(PromotionService::new(
                Arc::new(InMemoryPromotionStore::default()),
                roster.clone(),
                notifier.clone(),
            )),
            billing: Arc::new(BillingService::new(
                Arc::new(InMemoryBillingStore::default()),
                roster.clone(),
                notifier.clone(),
                defaults,
            )),
            roster,
            notifier,
        }
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
