use crate::infra::{Promotion, Workflows};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, Utc};
use clap::Args;
use dojo::error::AppError;
use dojo::workflows::access::{Caller, Role};
use dojo::workflows::billing::{
    next_scheduled_run, BillingCycle, BillingDefaults, BillingServiceError, NewPlan,
    SubscriptionAction, SubscriptionRequest,
};
use dojo::workflows::ids::{SchoolId, StudentId, UserId};
use dojo::workflows::notify::{NotificationPublisher, RecordingNotifier};
use dojo::workflows::promotion::{
    BeltId, EnrollmentId, EnrollmentRequest, EssayReviewRequest, EssaySubmission, NewBelt,
    NewProgram, NewRequirement, ProgramId, ProgressUpdate, PromotionRequest,
    PromotionServiceError, RequirementId, RequirementKind,
};
use dojo::workflows::roster::StudentRecord;
use std::sync::Arc;

type DemoPromotion = Promotion<RecordingNotifier>;

const DEMO_SCHOOL: &str = "school-demo";
const DEMO_STUDENTS: [(&str, &str); 3] = [
    ("student-kenji", "Kenji Sato"),
    ("student-mia", "Mia Torres"),
    ("student-ola", "Ola Nordmann"),
];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// First day of the demo (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Monthly membership price in cents.
    #[arg(long, default_value_t = 12_900)]
    pub(crate) price_cents: u64,
    /// Skip the billing portion of the demo.
    #[arg(long)]
    pub(crate) skip_billing: bool,
}

/// Register the demo school's students; returns how many were added.
pub(crate) fn seed_roster<N>(workflows: &Workflows<N>) -> Result<usize, AppError>
where
    N: NotificationPublisher + 'static,
{
    for (id, name) in DEMO_STUDENTS {
        workflows
            .roster
            .register(StudentRecord {
                id: StudentId::new(id),
                school_id: SchoolId::new(DEMO_SCHOOL),
                name: name.to_string(),
            })
            .map_err(PromotionServiceError::from)?;
    }
    Ok(DEMO_STUDENTS.len())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        today,
        price_cents,
        skip_billing,
    } = args;
    let today = today.unwrap_or_else(|| Local::now().date_naive());

    let workflows = Workflows::in_memory(
        Arc::new(RecordingNotifier::default()),
        BillingDefaults::default(),
    );
    seed_roster(&workflows)?;

    let school = SchoolId::new(DEMO_SCHOOL);
    let owner = Caller::staff(UserId::new("user-owner"), Role::Owner, school.clone());
    let sensei = Caller::staff(UserId::new("user-sensei"), Role::Instructor, school.clone());
    let kenji = Caller::student(
        UserId::new("user-kenji"),
        school.clone(),
        StudentId::new(DEMO_STUDENTS[0].0),
    );

    println!("Belt promotion demo ({today})");
    let karate = build_karate(&workflows.promotion, &owner)?;
    let enrollment = workflows.promotion.enroll(
        &sensei,
        EnrollmentRequest {
            student_id: StudentId::new(DEMO_STUDENTS[0].0),
            program_id: karate.program_id.clone(),
        },
        evening(today, 0),
    )?;
    report_status(&workflows.promotion, &kenji, &enrollment.id)?;

    match workflows.promotion.promote(
        &sensei,
        &enrollment.id,
        PromotionRequest::to(karate.white.clone()),
        evening(today, 0),
    ) {
        Ok(_) => println!("  Unexpected early promotion"),
        Err(err) => println!("  Early promotion refused: {err}"),
    }

    workflows.promotion.update_progress(
        &sensei,
        &enrollment.id,
        &karate.attendance_requirement,
        ProgressUpdate {
            current_value: 10,
            is_complete: true,
        },
        evening(today, 20),
    )?;
    let white = workflows.promotion.promote(
        &sensei,
        &enrollment.id,
        PromotionRequest::to(karate.white.clone()),
        evening(today, 20),
    )?;
    println!("- Promoted to {} after 10 classes", karate.name_of(&white.to_belt_id));
    report_status(&workflows.promotion, &kenji, &enrollment.id)?;

    let essay = workflows.promotion.submit_essay(
        &kenji,
        &enrollment.id,
        EssaySubmission {
            title: "What the dojo kun means to me".to_string(),
            content: "Seek perfection of character, be faithful, endeavor...".to_string(),
            test_id: None,
        },
        evening(today, 40),
    )?;
    workflows.promotion.review_essay(
        &sensei,
        &essay.id,
        EssayReviewRequest {
            score: 86,
            feedback: Some("Clear and personal".to_string()),
        },
        evening(today, 42),
    )?;
    let yellow = workflows.promotion.promote(
        &sensei,
        &enrollment.id,
        PromotionRequest::to(karate.yellow.clone()).with_notes("Essay reviewed, kata sharp"),
        evening(today, 45),
    )?;
    println!("- Promoted to {} after essay review", karate.name_of(&yellow.to_belt_id));

    let history = workflows.promotion.promotion_history(&kenji, &enrollment.id)?;
    println!("  Promotion history ({} entries):", history.len());
    for entry in &history {
        println!(
            "    - {} -> {} on {}",
            entry
                .from_belt_id
                .as_ref()
                .map(|belt| karate.name_of(belt))
                .unwrap_or("unranked"),
            karate.name_of(&entry.to_belt_id),
            entry.promoted_at.date_naive()
        );
    }

    if skip_billing {
        return report_notifications(&workflows);
    }

    println!("\nAuto-invoice demo");
    let billing = &workflows.billing;
    let plan = billing.create_plan(
        &owner,
        NewPlan {
            name: "Monthly Unlimited".to_string(),
            price_cents,
            billing_cycle: BillingCycle::Monthly,
            school_id: None,
        },
    )?;
    let mut subscriptions = Vec::new();
    for (student, _) in DEMO_STUDENTS {
        subscriptions.push(billing.subscribe(
            &owner,
            SubscriptionRequest {
                student_id: StudentId::new(student),
                plan_id: plan.id.clone(),
                start_date: Some(today),
            },
            today,
        )?);
    }
    println!(
        "- {} students on {} ({} cents, {})",
        subscriptions.len(),
        plan.name,
        plan.price_cents,
        plan.billing_cycle.label()
    );

    let platform = Caller::super_admin(UserId::new("user-platform"));
    let first = billing.trigger_auto_invoice(&platform, today)?;
    let repeat = billing.trigger_auto_invoice(&platform, today)?;
    println!(
        "- Run on {today}: {} invoices; immediate re-run: {}",
        first.invoices_generated, repeat.invoices_generated
    );

    billing.change_subscription(
        &owner,
        &subscriptions[2].id,
        SubscriptionAction::Pause,
        today,
    )?;
    println!("- {} paused their membership", DEMO_STUDENTS[2].1);

    let Some(next_run) = next_scheduled_run(today) else {
        return report_notifications(&workflows);
    };
    let summary = billing
        .scheduler()
        .run(next_run)
        .map_err(BillingServiceError::from)?;
    println!(
        "- Scheduled run on {next_run}: {} invoices, {} marked past due",
        summary.invoices_generated, summary.overdue_marked
    );

    for (student, name) in DEMO_STUDENTS {
        let invoices = billing.invoices_for_student(&owner, &StudentId::new(student))?;
        println!("  {name}:");
        for invoice in invoices {
            println!(
                "    - {} {} total {} due {}",
                invoice.invoice_number,
                invoice.status.label(),
                invoice.total_cents,
                invoice.due_date
            );
        }
    }

    report_notifications(&workflows)
}

struct KarateCatalog {
    program_id: ProgramId,
    belts: Vec<(BeltId, String)>,
    white: BeltId,
    yellow: BeltId,
    attendance_requirement: RequirementId,
}

impl KarateCatalog {
    fn name_of(&self, belt_id: &BeltId) -> &str {
        self.belts
            .iter()
            .find(|(id, _)| id == belt_id)
            .map(|(_, name)| name.as_str())
            .unwrap_or("unknown belt")
    }
}

fn build_karate(service: &DemoPromotion, owner: &Caller) -> Result<KarateCatalog, AppError> {
    let program = service.create_program(
        owner,
        NewProgram {
            name: "Karate".to_string(),
            description: Some("Traditional Shotokan curriculum".to_string()),
            global: false,
            has_rank_structure: true,
            school_id: None,
        },
    )?;

    let mut belts = Vec::new();
    for (order, name) in ["White", "Yellow", "Green"].into_iter().enumerate() {
        let belt = service.add_belt(
            owner,
            &program.id,
            NewBelt {
                name: name.to_string(),
                display_order: order as u32 + 1,
                color: Some(name.to_lowercase()),
                description: None,
            },
        )?;
        belts.push((belt.id, belt.name));
    }
    let white = belts[0].0.clone();
    let yellow = belts[1].0.clone();

    let attendance = service.add_requirement(
        owner,
        &white,
        NewRequirement {
            kind: RequirementKind::MinAttendance,
            description: "Attend 10 classes".to_string(),
            value: Some(10),
            is_required: true,
        },
    )?;
    service.add_requirement(
        owner,
        &yellow,
        NewRequirement {
            kind: RequirementKind::Essay,
            description: "Essay on the dojo kun".to_string(),
            value: None,
            is_required: true,
        },
    )?;

    println!("- Created {} with {} belts", program.name, belts.len());
    Ok(KarateCatalog {
        program_id: program.id,
        belts,
        white,
        yellow,
        attendance_requirement: attendance.id,
    })
}

fn report_status(
    service: &DemoPromotion,
    caller: &Caller,
    enrollment_id: &EnrollmentId,
) -> Result<(), AppError> {
    let status = service.evaluate(caller, enrollment_id)?;
    println!("  Status: {}", status.summary());
    Ok(())
}

fn report_notifications(workflows: &Workflows<RecordingNotifier>) -> Result<(), AppError> {
    let events = workflows.notifier.events();
    if events.is_empty() {
        println!("\nNotifications: none dispatched");
    } else {
        println!("\nNotifications:");
        for event in events {
            println!("  - template={} -> {}", event.template, event.subject_id);
        }
    }
    Ok(())
}

fn evening(day: NaiveDate, days_later: i64) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN);
    day.and_time(at).and_utc() + Duration::days(days_later)
}
