use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::workflows::access::{
    Caller, Role, ROLE_HEADER, SCHOOL_HEADER, STUDENT_HEADER, USER_HEADER,
};
use crate::workflows::billing::domain::{
    BillingCycle, BillingTerms, MembershipPlan, NewPlan, Subscription, SubscriptionRequest,
};
use crate::workflows::billing::{BillingDefaults, BillingService, InMemoryBillingStore};
use crate::workflows::ids::{SchoolId, StudentId, UserId};
use crate::workflows::notify::RecordingNotifier;
use crate::workflows::roster::{InMemoryRoster, StudentRecord};

pub(super) type Service = BillingService<InMemoryBillingStore, RecordingNotifier>;

pub(super) fn school() -> SchoolId {
    SchoolId::new("school-north")
}

pub(super) fn owner() -> Caller {
    Caller::staff(UserId::new("user-owner"), Role::Owner, school())
}

pub(super) fn rival_owner() -> Caller {
    Caller::staff(
        UserId::new("user-rival"),
        Role::Owner,
        SchoolId::new("school-south"),
    )
}

pub(super) fn admin() -> Caller {
    Caller::super_admin(UserId::new("user-root"))
}

pub(super) fn member(student: &str) -> Caller {
    Caller::student(
        UserId::new(format!("user-{student}")),
        school(),
        StudentId::new(student),
    )
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn defaults(auto_send_invoices: bool) -> BillingDefaults {
    BillingDefaults {
        terms: BillingTerms {
            grace_period_days: 5,
            tax_rate_bps: 0,
            invoice_due_days: 14,
        },
        auto_send_invoices,
    }
}

/// A school front desk with a $129 monthly plan.
pub(super) struct FrontDesk {
    pub(super) service: Service,
    pub(super) store: Arc<InMemoryBillingStore>,
    pub(super) roster: Arc<InMemoryRoster>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) monthly: MembershipPlan,
}

impl FrontDesk {
    pub(super) fn open() -> Self {
        Self::open_with(defaults(true))
    }

    pub(super) fn open_with(defaults: BillingDefaults) -> Self {
        let store = Arc::new(InMemoryBillingStore::default());
        let roster = Arc::new(InMemoryRoster::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let service =
            BillingService::new(store.clone(), roster.clone(), notifier.clone(), defaults);
        let monthly = service
            .create_plan(
                &owner(),
                NewPlan {
                    name: "Monthly Unlimited".to_string(),
                    price_cents: 12_900,
                    billing_cycle: BillingCycle::Monthly,
                    school_id: None,
                },
            )
            .expect("plan created");

        Self {
            service,
            store,
            roster,
            notifier,
            monthly,
        }
    }

    /// Put a student on this school's roster.
    pub(super) fn enroll(&self, student: &str) -> StudentId {
        let id = StudentId::new(student);
        self.roster
            .register(StudentRecord {
                id: id.clone(),
                school_id: school(),
                name: student.trim_start_matches("student-").to_string(),
            })
            .expect("roster accepts student");
        id
    }

    pub(super) fn subscribe(&self, student: &str, start: NaiveDate) -> Subscription {
        self.enroll(student);
        self.service
            .subscribe(
                &owner(),
                SubscriptionRequest {
                    student_id: StudentId::new(student),
                    plan_id: self.monthly.id.clone(),
                    start_date: Some(start),
                },
                start,
            )
            .expect("subscription created")
    }
}

pub(super) fn request(
    method: &str,
    uri: &str,
    caller: Option<&Caller>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header(USER_HEADER, caller.user_id.as_str())
            .header(ROLE_HEADER, caller.role.label());
        if let Some(school_id) = &caller.school_id {
            builder = builder.header(SCHOOL_HEADER, school_id.as_str());
        }
        if let Some(student_id) = &caller.student_id {
            builder = builder.header(STUDENT_HEADER, student_id.as_str());
        }
    }
    match body {
        Some(json) => builder
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json).expect("serialize body")))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
