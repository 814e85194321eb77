use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::domain::{
    Belt, BeltId, EnrollmentId, EnrollmentRequest, Essay, EssayId, EssayReview, EssayReviewId,
    EssayReviewRequest, EssaySubmission, NewBelt, NewProgram, NewRequirement, Program,
    ProgramEnrollment, ProgramId, ProgramOwnership, ProgramQuery, ProgressId, ProgressUpdate,
    PromotionHistory, PromotionId, PromotionRequest, Requirement, RequirementId,
    RequirementKind, RequirementProgress,
};
use super::evaluation::{PromotionEvaluator, PromotionSnapshot, PromotionStatus, SnapshotError};
use super::repository::{PromotionRepository, PromotionWriter, RepositoryError};
use crate::workflows::access::{authorize, AccessDenied, Action, Caller, ResourceScope};
use crate::workflows::notify::{dispatch, Notification, NotificationPublisher};
use crate::workflows::roster::StudentDirectory;

const MAX_ESSAY_SCORE: i32 = 100;

/// Service composing the catalog, progress tracker, essay flow, evaluator and executor.
pub struct PromotionService<R, N> {
    repository: Arc<R>,
    roster: Arc<dyn StudentDirectory>,
    notifier: Arc<N>,
    evaluator: PromotionEvaluator,
}

impl<R, N> PromotionService<R, N>
where
    R: PromotionRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(repository: Arc<R>, roster: Arc<dyn StudentDirectory>, notifier: Arc<N>) -> Self {
        Self {
            repository,
            roster,
            notifier,
            evaluator: PromotionEvaluator,
        }
    }

    /// Create a school-scoped program, or a global one for super admins.
    pub fn create_program(
        &self,
        caller: &Caller,
        request: NewProgram,
    ) -> Result<Program, PromotionServiceError> {
        let name = required_text(&request.name, "program name")?;
        let ownership = if request.global {
            authorize(caller, Action::ManageGlobalCatalog, &ResourceScope::Platform)?;
            ProgramOwnership::Global
        } else {
            let school_id = request
                .school_id
                .clone()
                .or_else(|| caller.school_id.clone())
                .ok_or_else(|| {
                    PromotionServiceError::Validation("school-scoped programs need a school".into())
                })?;
            authorize(
                caller,
                Action::ManageCatalog,
                &ResourceScope::School(school_id.clone()),
            )?;
            ProgramOwnership::School(school_id)
        };

        let program = self.repository.insert_program(Program {
            id: ProgramId::mint(),
            name,
            description: request.description,
            ownership,
            has_rank_structure: request.has_rank_structure,
            is_active: true,
        })?;
        info!(program = %program.id, name = %program.name, "program created");
        Ok(program)
    }

    /// Active programs visible to a school (owned or global), the caller's own by default.
    pub fn programs_for(
        &self,
        caller: &Caller,
        query: ProgramQuery,
    ) -> Result<Vec<Program>, PromotionServiceError> {
        let school_id = query
            .school_id
            .or_else(|| caller.school_id.clone())
            .ok_or_else(|| {
                PromotionServiceError::Validation("no school named for the program listing".into())
            })?;
        authorize(
            caller,
            Action::ViewCatalog,
            &ResourceScope::School(school_id.clone()),
        )?;
        let programs = self.repository.programs_visible_to(&school_id)?;
        Ok(programs
            .into_iter()
            .filter(|program| program.is_active)
            .collect())
    }

    pub fn add_belt(
        &self,
        caller: &Caller,
        program_id: &ProgramId,
        request: NewBelt,
    ) -> Result<Belt, PromotionServiceError> {
        let program = self
            .repository
            .program(program_id)?
            .ok_or(PromotionServiceError::NotFound("program"))?;
        authorize_catalog(caller, &program)?;

        if !program.has_rank_structure {
            return Err(PromotionServiceError::Validation(format!(
                "program {} has no rank structure",
                program.name
            )));
        }
        if request.display_order == 0 {
            return Err(PromotionServiceError::Validation(
                "display order starts at 1".into(),
            ));
        }

        let belt = Belt {
            id: BeltId::mint(),
            program_id: program.id.clone(),
            name: required_text(&request.name, "belt name")?,
            display_order: request.display_order,
            color: request.color,
            description: request.description,
        };

        match self.repository.insert_belt(belt) {
            Ok(belt) => Ok(belt),
            Err(RepositoryError::Conflict) => Err(PromotionServiceError::Validation(format!(
                "display order {} is already used in {}",
                request.display_order, program.name
            ))),
            Err(other) => Err(other.into()),
        }
    }

    pub fn add_requirement(
        &self,
        caller: &Caller,
        belt_id: &BeltId,
        request: NewRequirement,
    ) -> Result<Requirement, PromotionServiceError> {
        let belt = self
            .repository
            .belt(belt_id)?
            .ok_or(PromotionServiceError::NotFound("belt"))?;
        let program = self
            .repository
            .program(&belt.program_id)?
            .ok_or(PromotionServiceError::NotFound("program"))?;
        authorize_catalog(caller, &program)?;

        if request.value.is_some_and(|value| value < 0) {
            return Err(PromotionServiceError::Validation(
                "requirement threshold must be non-negative".into(),
            ));
        }

        let requirement = self.repository.insert_requirement(Requirement {
            id: RequirementId::mint(),
            belt_id: belt.id,
            kind: request.kind,
            description: required_text(&request.description, "requirement description")?,
            value: request.value,
            is_required: request.is_required,
        })?;
        Ok(requirement)
    }

    /// Enroll a roster student into a program visible to their school.
    pub fn enroll(
        &self,
        caller: &Caller,
        request: EnrollmentRequest,
        at: DateTime<Utc>,
    ) -> Result<ProgramEnrollment, PromotionServiceError> {
        let student = self
            .roster
            .student(&request.student_id)?
            .ok_or(PromotionServiceError::NotFound("student"))?;
        authorize(
            caller,
            Action::Enroll,
            &ResourceScope::School(student.school_id.clone()),
        )?;

        let program = self
            .repository
            .program(&request.program_id)?
            .filter(|program| program.ownership.visible_to(&student.school_id))
            .ok_or(PromotionServiceError::NotFound("program"))?;
        if !program.is_active {
            return Err(PromotionServiceError::Validation(format!(
                "program {} is not accepting enrollments",
                program.name
            )));
        }

        let enrollment = ProgramEnrollment {
            id: EnrollmentId::mint(),
            student_id: student.id,
            school_id: student.school_id,
            program_id: program.id,
            current_belt_id: None,
            enrolled_at: at,
        };

        match self.repository.insert_enrollment(enrollment) {
            Ok(enrollment) => {
                info!(enrollment = %enrollment.id, student = %enrollment.student_id, "student enrolled");
                Ok(enrollment)
            }
            Err(RepositoryError::Conflict) => Err(PromotionServiceError::Validation(
                "student is already enrolled in this program".into(),
            )),
            Err(other) => Err(other.into()),
        }
    }

    pub fn withdraw(
        &self,
        caller: &Caller,
        enrollment_id: &EnrollmentId,
    ) -> Result<(), PromotionServiceError> {
        let enrollment = self.load_enrollment(enrollment_id)?;
        authorize(caller, Action::Enroll, &enrollment_scope(&enrollment))?;
        self.repository.remove_enrollment(enrollment_id)?;
        info!(enrollment = %enrollment_id, "enrollment withdrawn");
        Ok(())
    }

    /// Pure read: belts, next belt, requirement completion and eligibility.
    pub fn evaluate(
        &self,
        caller: &Caller,
        enrollment_id: &EnrollmentId,
    ) -> Result<PromotionStatus, PromotionServiceError> {
        let snapshot = PromotionSnapshot::load(self.repository.as_ref(), enrollment_id)?;
        authorize(
            caller,
            Action::ViewProgress,
            &enrollment_scope(&snapshot.enrollment),
        )?;
        Ok(self.evaluator.evaluate(&snapshot))
    }

    /// Staff upsert of a requirement's progress for the enrollment's next belt.
    pub fn update_progress(
        &self,
        caller: &Caller,
        enrollment_id: &EnrollmentId,
        requirement_id: &RequirementId,
        update: ProgressUpdate,
        at: DateTime<Utc>,
    ) -> Result<RequirementProgress, PromotionServiceError> {
        if update.current_value < 0 {
            return Err(PromotionServiceError::Validation(
                "current value must be non-negative".into(),
            ));
        }

        let snapshot = PromotionSnapshot::load(self.repository.as_ref(), enrollment_id)?;
        authorize(
            caller,
            Action::LogProgress,
            &enrollment_scope(&snapshot.enrollment),
        )?;

        let requirement = self
            .repository
            .requirement(requirement_id)?
            .ok_or(PromotionServiceError::NotFound("requirement"))?;
        if requirement.kind == RequirementKind::Essay {
            return Err(PromotionServiceError::Validation(
                "essay requirements are completed through essay review".into(),
            ));
        }
        if !snapshot
            .requirements
            .iter()
            .any(|candidate| candidate.id == requirement.id)
        {
            return Err(PromotionServiceError::Validation(format!(
                "requirement {} does not belong to this enrollment's next belt",
                requirement.id
            )));
        }

        let progress = self.repository.upsert_progress(RequirementProgress {
            id: ProgressId::mint(),
            enrollment_id: enrollment_id.clone(),
            requirement_id: requirement.id,
            current_value: update.current_value,
            is_complete: update.is_complete,
            updated_at: at,
        })?;
        debug!(
            enrollment = %enrollment_id,
            requirement = %progress.requirement_id,
            kind = requirement.kind.label(),
            value = progress.current_value,
            complete = progress.is_complete,
            "requirement progress recorded"
        );
        Ok(progress)
    }

    /// Student (or staff on their behalf) submits an essay aimed at the next belt.
    pub fn submit_essay(
        &self,
        caller: &Caller,
        enrollment_id: &EnrollmentId,
        submission: EssaySubmission,
        at: DateTime<Utc>,
    ) -> Result<Essay, PromotionServiceError> {
        let snapshot = PromotionSnapshot::load(self.repository.as_ref(), enrollment_id)?;
        authorize(
            caller,
            Action::SubmitEssay,
            &enrollment_scope(&snapshot.enrollment),
        )?;

        let essay = self.repository.insert_essay(Essay {
            id: EssayId::mint(),
            enrollment_id: enrollment_id.clone(),
            test_id: submission.test_id,
            target_belt_id: snapshot.next_belt().map(|belt| belt.id.clone()),
            title: required_text(&submission.title, "essay title")?,
            content: required_text(&submission.content, "essay content")?,
            submitted_at: at,
            score: None,
            feedback: None,
            reviewed_by: None,
            reviewed_at: None,
        })?;
        info!(essay = %essay.id, enrollment = %enrollment_id, "essay submitted");
        Ok(essay)
    }

    /// Score an essay. Re-reviews overwrite the essay and append to the review log.
    pub fn review_essay(
        &self,
        caller: &Caller,
        essay_id: &EssayId,
        request: EssayReviewRequest,
        at: DateTime<Utc>,
    ) -> Result<Essay, PromotionServiceError> {
        let score = u8::try_from(request.score)
            .ok()
            .filter(|score| i32::from(*score) <= MAX_ESSAY_SCORE)
            .ok_or_else(|| {
                PromotionServiceError::Validation(format!(
                    "essay score must be between 0 and {MAX_ESSAY_SCORE}"
                ))
            })?;

        let essay = self
            .repository
            .essay(essay_id)?
            .ok_or(PromotionServiceError::NotFound("essay"))?;
        let enrollment = self.load_enrollment(&essay.enrollment_id)?;
        authorize(caller, Action::ReviewEssay, &enrollment_scope(&enrollment))?;

        let re_review = essay.is_reviewed();
        let updated = self.repository.record_review(EssayReview {
            id: EssayReviewId::mint(),
            essay_id: essay.id,
            score,
            feedback: request.feedback.filter(|text| !text.trim().is_empty()),
            reviewed_by: caller.user_id.clone(),
            reviewed_at: at,
        })?;
        info!(essay = %updated.id, score, re_review, "essay reviewed");
        Ok(updated)
    }

    pub fn essays(
        &self,
        caller: &Caller,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<Essay>, PromotionServiceError> {
        let enrollment = self.load_enrollment(enrollment_id)?;
        authorize(caller, Action::ViewProgress, &enrollment_scope(&enrollment))?;
        Ok(self.repository.essays(enrollment_id)?)
    }

    pub fn essay_reviews(
        &self,
        caller: &Caller,
        essay_id: &EssayId,
    ) -> Result<Vec<EssayReview>, PromotionServiceError> {
        let essay = self
            .repository
            .essay(essay_id)?
            .ok_or(PromotionServiceError::NotFound("essay"))?;
        let enrollment = self.load_enrollment(&essay.enrollment_id)?;
        authorize(caller, Action::ReviewEssay, &enrollment_scope(&enrollment))?;
        Ok(self.repository.essay_reviews(essay_id)?)
    }

    /// Advance the enrollment one belt. Eligibility is re-checked inside the transaction.
    pub fn promote(
        &self,
        caller: &Caller,
        enrollment_id: &EnrollmentId,
        request: PromotionRequest,
        at: DateTime<Utc>,
    ) -> Result<PromotionHistory, PromotionServiceError> {
        let entry = self
            .repository
            .atomically(|tx| self.promote_within(tx, caller, enrollment_id, &request, at))?;

        info!(
            enrollment = %enrollment_id,
            to = %entry.to_belt_id,
            by = %entry.promoted_by,
            "enrollment promoted"
        );

        let mut notice = Notification::new("belt_promoted", enrollment_id.as_str())
            .with_detail("to_belt_id", entry.to_belt_id.as_str());
        if let Some(from) = &entry.from_belt_id {
            notice = notice.with_detail("from_belt_id", from.as_str());
        }
        dispatch(self.notifier.as_ref(), notice);

        Ok(entry)
    }

    /// Promotion audit trail, oldest first.
    pub fn promotion_history(
        &self,
        caller: &Caller,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<PromotionHistory>, PromotionServiceError> {
        let enrollment = self.load_enrollment(enrollment_id)?;
        authorize(caller, Action::ViewProgress, &enrollment_scope(&enrollment))?;
        Ok(self.repository.history(enrollment_id)?)
    }

    fn promote_within(
        &self,
        tx: &mut dyn PromotionWriter,
        caller: &Caller,
        enrollment_id: &EnrollmentId,
        request: &PromotionRequest,
        at: DateTime<Utc>,
    ) -> Result<PromotionHistory, PromotionServiceError> {
        let snapshot = PromotionSnapshot::load(&*tx, enrollment_id)?;
        authorize(caller, Action::Promote, &enrollment_scope(&snapshot.enrollment))?;

        let status = self.evaluator.evaluate(&snapshot);
        let target = &request.target_belt_id;
        let Some(next) = status.next_belt.clone() else {
            // A retry aimed at the top belt after it was granted is still a stale target.
            let holds_target = snapshot.enrollment.current_belt_id.as_ref() == Some(target);
            return Err(if holds_target || snapshot.ladder.find(target).is_none() {
                stale_target(&snapshot, target)
            } else {
                PromotionServiceError::HighestRankAchieved
            });
        };

        if target != &next.id {
            return Err(stale_target(&snapshot, target));
        }

        if !status.ready_for_promotion {
            return Err(PromotionServiceError::NotReady {
                belt: next.name.clone(),
                missing: status
                    .missing()
                    .map(|item| item.requirement.description.clone())
                    .collect(),
            });
        }

        let entry = PromotionHistory {
            id: PromotionId::mint(),
            enrollment_id: enrollment_id.clone(),
            from_belt_id: snapshot.enrollment.current_belt_id.clone(),
            to_belt_id: next.id.clone(),
            promoted_by: caller.user_id.clone(),
            promoted_at: at,
            notes: request.notes.clone().filter(|notes| !notes.trim().is_empty()),
        };
        tx.set_current_belt(enrollment_id, &next.id)?;
        tx.append_history(entry.clone())?;
        Ok(entry)
    }

    fn load_enrollment(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<ProgramEnrollment, PromotionServiceError> {
        self.repository
            .enrollment(enrollment_id)?
            .ok_or(PromotionServiceError::NotFound("enrollment"))
    }
}

fn enrollment_scope(enrollment: &ProgramEnrollment) -> ResourceScope {
    ResourceScope::Student {
        school_id: enrollment.school_id.clone(),
        student_id: enrollment.student_id.clone(),
    }
}

fn authorize_catalog(caller: &Caller, program: &Program) -> Result<(), AccessDenied> {
    match &program.ownership {
        ProgramOwnership::Global => {
            authorize(caller, Action::ManageGlobalCatalog, &ResourceScope::Platform)
        }
        ProgramOwnership::School(school_id) => authorize(
            caller,
            Action::ManageCatalog,
            &ResourceScope::School(school_id.clone()),
        ),
    }
}

/// The client aimed at a belt other than the current next belt.
fn stale_target(snapshot: &PromotionSnapshot, expected: &BeltId) -> PromotionServiceError {
    let Some(expected_belt) = snapshot.ladder.find(expected) else {
        return PromotionServiceError::Validation(format!(
            "belt {expected} is not part of this program"
        ));
    };
    let current_order = snapshot.current_belt().map(|belt| belt.display_order);

    if current_order.is_some_and(|order| expected_belt.display_order <= order) {
        PromotionServiceError::AlreadyPromoted {
            belt: expected_belt.name.clone(),
        }
    } else {
        PromotionServiceError::Validation(format!(
            "{} is not the next belt; promotions advance one rank at a time",
            expected_belt.name
        ))
    }
}

fn required_text(value: &str, field: &str) -> Result<String, PromotionServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(PromotionServiceError::Validation(format!(
            "{field} is required"
        )))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Error raised by the promotion service.
#[derive(Debug, thiserror::Error)]
pub enum PromotionServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Forbidden(#[from] AccessDenied),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not ready for promotion to {belt}; outstanding: {}", .missing.join(", "))]
    NotReady { belt: String, missing: Vec<String> },
    #[error("enrollment already holds {belt}")]
    AlreadyPromoted { belt: String },
    #[error("highest rank achieved")]
    HighestRankAchieved,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PromotionServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PromotionServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PromotionServiceError::Forbidden(AccessDenied::Unauthenticated(_)) => {
                StatusCode::UNAUTHORIZED
            }
            PromotionServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            PromotionServiceError::NotFound(_)
            | PromotionServiceError::Repository(RepositoryError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            PromotionServiceError::NotReady { .. }
            | PromotionServiceError::AlreadyPromoted { .. }
            | PromotionServiceError::HighestRankAchieved
            | PromotionServiceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            PromotionServiceError::Repository(RepositoryError::Unavailable(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SnapshotError> for PromotionServiceError {
    fn from(value: SnapshotError) -> Self {
        match value {
            SnapshotError::Missing(what) => PromotionServiceError::NotFound(what),
            SnapshotError::Repository(err) => PromotionServiceError::Repository(err),
        }
    }
}
