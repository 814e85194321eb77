use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::access::{
    Caller, Role, ROLE_HEADER, SCHOOL_HEADER, STUDENT_HEADER, USER_HEADER,
};
use crate::workflows::ids::{SchoolId, StudentId, UserId};
use crate::workflows::notify::RecordingNotifier;
use crate::workflows::promotion::domain::{
    Belt, BeltId, EnrollmentId, EnrollmentRequest, Essay, EssayId, EssayReview, NewBelt,
    NewProgram, NewRequirement, Program, ProgramEnrollment, ProgramId, ProgressUpdate,
    PromotionHistory, PromotionRequest, Requirement, RequirementId, RequirementKind,
    RequirementProgress,
};
use crate::workflows::promotion::repository::{
    PromotionReader, PromotionRepository, PromotionWriter, RepositoryError,
};
use crate::workflows::promotion::{InMemoryPromotionStore, PromotionService};
use crate::workflows::roster::{InMemoryRoster, StudentRecord};

pub(super) type Service = PromotionService<InMemoryPromotionStore, RecordingNotifier>;

pub(super) fn school() -> SchoolId {
    SchoolId::new("school-north")
}

pub(super) fn student_id() -> StudentId {
    StudentId::new("student-ada")
}

pub(super) fn owner() -> Caller {
    Caller::staff(UserId::new("user-owner"), Role::Owner, school())
}

pub(super) fn instructor() -> Caller {
    Caller::staff(UserId::new("user-sensei"), Role::Instructor, school())
}

pub(super) fn rival_instructor() -> Caller {
    Caller::staff(
        UserId::new("user-rival"),
        Role::Instructor,
        SchoolId::new("school-south"),
    )
}

pub(super) fn student() -> Caller {
    Caller::student(UserId::new("user-ada"), school(), student_id())
}

pub(super) fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 18, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Karate with White (1), Yellow (2), Green (3); White needs 10 classes attended.
pub(super) struct KarateDojo {
    pub(super) service: Service,
    pub(super) store: Arc<InMemoryPromotionStore>,
    pub(super) roster: Arc<InMemoryRoster>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) program: Program,
    pub(super) white: Belt,
    pub(super) yellow: Belt,
    pub(super) green: Belt,
    pub(super) attendance: Requirement,
    pub(super) enrollment: ProgramEnrollment,
}

impl KarateDojo {
    pub(super) fn open() -> Self {
        let store = Arc::new(InMemoryPromotionStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        Self::open_with(store, notifier)
    }

    pub(super) fn open_with(
        store: Arc<InMemoryPromotionStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> Self {
        let roster = Arc::new(InMemoryRoster::default());
        roster
            .register(StudentRecord {
                id: student_id(),
                school_id: school(),
                name: "Ada Park".to_string(),
            })
            .expect("roster accepts student");

        let service = PromotionService::new(store.clone(), roster.clone(), notifier.clone());
        let program = service
            .create_program(
                &owner(),
                NewProgram {
                    name: "Karate".to_string(),
                    description: Some("Traditional Shotokan".to_string()),
                    global: false,
                    has_rank_structure: true,
                    school_id: None,
                },
            )
            .expect("program created");

        let white = add_belt(&service, &program.id, "White", 1);
        let yellow = add_belt(&service, &program.id, "Yellow", 2);
        let green = add_belt(&service, &program.id, "Green", 3);

        let attendance = add_requirement(
            &service,
            &white.id,
            RequirementKind::MinAttendance,
            "Attend 10 classes",
            Some(10),
            true,
        );

        let enrollment = service
            .enroll(
                &instructor(),
                EnrollmentRequest {
                    student_id: student_id(),
                    program_id: program.id.clone(),
                },
                at(1),
            )
            .expect("student enrolled");

        Self {
            service,
            store,
            roster,
            notifier,
            program,
            white,
            yellow,
            green,
            attendance,
            enrollment,
        }
    }

    pub(super) fn complete(&self, requirement: &Requirement, value: i32) {
        self.service
            .update_progress(
                &instructor(),
                &self.enrollment.id,
                &requirement.id,
                ProgressUpdate {
                    current_value: value,
                    is_complete: true,
                },
                at(2),
            )
            .expect("progress recorded");
    }

    /// Complete the attendance requirement and promote to White.
    pub(super) fn earn_white(&self) -> PromotionHistory {
        self.complete(&self.attendance, 10);
        self.service
            .promote(
                &instructor(),
                &self.enrollment.id,
                PromotionRequest::to(self.white.id.clone()),
                at(3),
            )
            .expect("promoted to white")
    }
}

pub(super) fn add_belt(service: &Service, program_id: &ProgramId, name: &str, order: u32) -> Belt {
    service
        .add_belt(
            &owner(),
            program_id,
            NewBelt {
                name: name.to_string(),
                display_order: order,
                color: Some(name.to_ascii_lowercase()),
                description: None,
            },
        )
        .expect("belt added")
}

pub(super) fn add_requirement(
    service: &Service,
    belt_id: &BeltId,
    kind: RequirementKind,
    description: &str,
    value: Option<i32>,
    is_required: bool,
) -> Requirement {
    service
        .add_requirement(
            &owner(),
            belt_id,
            NewRequirement {
                kind,
                description: description.to_string(),
                value,
                is_required,
            },
        )
        .expect("requirement added")
}

pub(super) fn staged(started: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    started + Duration::minutes(minutes)
}

/// Store whose transactions lose the history write, to prove promotions roll back.
#[derive(Clone)]
pub(super) struct HistoryOutageStore {
    pub(super) inner: Arc<InMemoryPromotionStore>,
}

struct HistoryOutageWriter<'a> {
    inner: &'a mut dyn PromotionWriter,
}

impl PromotionReader for HistoryOutageWriter<'_> {
    fn program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError> {
        self.inner.program(id)
    }

    fn belts(&self, program_id: &ProgramId) -> Result<Vec<Belt>, RepositoryError> {
        self.inner.belts(program_id)
    }

    fn belt(&self, id: &BeltId) -> Result<Option<Belt>, RepositoryError> {
        self.inner.belt(id)
    }

    fn requirements(&self, belt_id: &BeltId) -> Result<Vec<Requirement>, RepositoryError> {
        self.inner.requirements(belt_id)
    }

    fn requirement(&self, id: &RequirementId) -> Result<Option<Requirement>, RepositoryError> {
        self.inner.requirement(id)
    }

    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<ProgramEnrollment>, RepositoryError> {
        self.inner.enrollment(id)
    }

    fn progress(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<RequirementProgress>, RepositoryError> {
        self.inner.progress(enrollment_id)
    }

    fn essays(&self, enrollment_id: &EnrollmentId) -> Result<Vec<Essay>, RepositoryError> {
        self.inner.essays(enrollment_id)
    }
}

impl PromotionWriter for HistoryOutageWriter<'_> {
    fn set_current_belt(
        &mut self,
        enrollment_id: &EnrollmentId,
        belt_id: &BeltId,
    ) -> Result<(), RepositoryError> {
        self.inner.set_current_belt(enrollment_id, belt_id)
    }

    fn append_history(&mut self, _entry: PromotionHistory) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("history table offline".to_string()))
    }
}

impl PromotionReader for HistoryOutageStore {
    fn program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError> {
        self.inner.program(id)
    }

    fn belts(&self, program_id: &ProgramId) -> Result<Vec<Belt>, RepositoryError> {
        self.inner.belts(program_id)
    }

    fn belt(&self, id: &BeltId) -> Result<Option<Belt>, RepositoryError> {
        self.inner.belt(id)
    }

    fn requirements(&self, belt_id: &BeltId) -> Result<Vec<Requirement>, RepositoryError> {
        self.inner.requirements(belt_id)
    }

    fn requirement(&self, id: &RequirementId) -> Result<Option<Requirement>, RepositoryError> {
        self.inner.requirement(id)
    }

    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<ProgramEnrollment>, RepositoryError> {
        self.inner.enrollment(id)
    }

    fn progress(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<RequirementProgress>, RepositoryError> {
        self.inner.progress(enrollment_id)
    }

    fn essays(&self, enrollment_id: &EnrollmentId) -> Result<Vec<Essay>, RepositoryError> {
        self.inner.essays(enrollment_id)
    }
}

impl PromotionRepository for HistoryOutageStore {
    fn insert_program(&self, program: Program) -> Result<Program, RepositoryError> {
        self.inner.insert_program(program)
    }

    fn programs_visible_to(&self, school_id: &SchoolId) -> Result<Vec<Program>, RepositoryError> {
        self.inner.programs_visible_to(school_id)
    }

    fn insert_belt(&self, belt: Belt) -> Result<Belt, RepositoryError> {
        self.inner.insert_belt(belt)
    }

    fn insert_requirement(
        &self,
        requirement: Requirement,
    ) -> Result<Requirement, RepositoryError> {
        self.inner.insert_requirement(requirement)
    }

    fn insert_enrollment(
        &self,
        enrollment: ProgramEnrollment,
    ) -> Result<ProgramEnrollment, RepositoryError> {
        self.inner.insert_enrollment(enrollment)
    }

    fn remove_enrollment(&self, id: &EnrollmentId) -> Result<(), RepositoryError> {
        self.inner.remove_enrollment(id)
    }

    fn upsert_progress(
        &self,
        progress: RequirementProgress,
    ) -> Result<RequirementProgress, RepositoryError> {
        self.inner.upsert_progress(progress)
    }

    fn insert_essay(&self, essay: Essay) -> Result<Essay, RepositoryError> {
        self.inner.insert_essay(essay)
    }

    fn essay(&self, id: &EssayId) -> Result<Option<Essay>, RepositoryError> {
        self.inner.essay(id)
    }

    fn record_review(&self, review: EssayReview) -> Result<Essay, RepositoryError> {
        self.inner.record_review(review)
    }

    fn essay_reviews(&self, essay_id: &EssayId) -> Result<Vec<EssayReview>, RepositoryError> {
        self.inner.essay_reviews(essay_id)
    }

    fn history(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<PromotionHistory>, RepositoryError> {
        self.inner.history(enrollment_id)
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PromotionWriter) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        self.inner.atomically(|tx| {
            let mut outage = HistoryOutageWriter { inner: tx };
            work(&mut outage)
        })
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

pub(super) fn assert_conflict_response(response: &Response) {
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
