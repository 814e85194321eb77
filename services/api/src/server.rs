use crate::cli::ServeArgs;
use crate::demo::seed_roster;
use crate::infra::{AppState, Billing, Workflows};
use crate::routes::with_workflow_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::{NaiveTime, Utc};
use dojo::config::AppConfig;
use dojo::error::AppError;
use dojo::telemetry;
use dojo::workflows::billing::{next_scheduled_run, BillingDefaults};
use dojo::workflows::notify::LoggingNotifier;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let workflows = Workflows::in_memory(
        Arc::new(LoggingNotifier),
        BillingDefaults::from(&config.billing),
    );
    if args.seed_roster {
        let seeded = seed_roster(&workflows)?;
        info!(students = seeded, "demo roster registered");
    }

    if config.billing.scheduler_enabled {
        tokio::spawn(auto_invoice_timer(workflows.billing.clone()));
    } else {
        info!("auto-invoice timer disabled; runs happen on demand only");
    }

    let app = with_workflow_routes(&workflows)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "dojo core ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Sleeps until midnight UTC on the 1st of each month, then runs auto-invoicing for that day.
async fn auto_invoice_timer(billing: Arc<Billing<LoggingNotifier>>) {
    loop {
        let today = Utc::now().date_naive();
        let Some(run_on) = next_scheduled_run(today) else {
            warn!(%today, "no further auto-invoice run fits the calendar");
            return;
        };
        let wait = run_on.and_time(NaiveTime::MIN).and_utc() - Utc::now();
        info!(%run_on, "next auto-invoice run scheduled");
        tokio::time::sleep(wait.to_std().unwrap_or_default()).await;

        if let Err(err) = billing.scheduler().run(run_on) {
            error!(%run_on, error = %err, "auto-invoice run failed");
        }
    }
}
