use super::domain::{
    Belt, BeltId, EnrollmentId, Essay, EssayId, EssayReview, Program, ProgramEnrollment,
    ProgramId, PromotionHistory, Requirement, RequirementId, RequirementProgress,
};
use crate::workflows::ids::SchoolId;
pub use crate::workflows::storage::RepositoryError;

/// Read side shared by the repository and its units of work, so the evaluator sees the same
/// data inside and outside a transaction.
pub trait PromotionReader {
    fn program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError>;
    fn belts(&self, program_id: &ProgramId) -> Result<Vec<Belt>, RepositoryError>;
    fn belt(&self, id: &BeltId) -> Result<Option<Belt>, RepositoryError>;
    fn requirements(&self, belt_id: &BeltId) -> Result<Vec<Requirement>, RepositoryError>;
    fn requirement(&self, id: &RequirementId) -> Result<Option<Requirement>, RepositoryError>;
    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<ProgramEnrollment>, RepositoryError>;
    fn progress(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<RequirementProgress>, RepositoryError>;
    fn essays(&self, enrollment_id: &EnrollmentId) -> Result<Vec<Essay>, RepositoryError>;
}

/// Writes available inside [`PromotionRepository::atomically`].
pub trait PromotionWriter: PromotionReader {
    fn set_current_belt(
        &mut self,
        enrollment_id: &EnrollmentId,
        belt_id: &BeltId,
    ) -> Result<(), RepositoryError>;
    fn append_history(&mut self, entry: PromotionHistory) -> Result<(), RepositoryError>;
}

/// Storage abstraction for the catalog, enrollments, progress, essays and promotion history.
pub trait PromotionRepository: PromotionReader + Send + Sync {
    fn insert_program(&self, program: Program) -> Result<Program, RepositoryError>;
    /// Programs owned by `school_id` plus every global program.
    fn programs_visible_to(&self, school_id: &SchoolId) -> Result<Vec<Program>, RepositoryError>;
    /// Fails with `Conflict` when the program already has a belt at that display order.
    fn insert_belt(&self, belt: Belt) -> Result<Belt, RepositoryError>;
    fn insert_requirement(&self, requirement: Requirement)
        -> Result<Requirement, RepositoryError>;

    /// Fails with `Conflict` when the student is already enrolled in the program.
    fn insert_enrollment(
        &self,
        enrollment: ProgramEnrollment,
    ) -> Result<ProgramEnrollment, RepositoryError>;
    /// Removes the enrollment with its progress, history, essays and reviews.
    fn remove_enrollment(&self, id: &EnrollmentId) -> Result<(), RepositoryError>;

    /// Upsert keyed by `(enrollment_id, requirement_id)`; an existing row keeps its id.
    fn upsert_progress(
        &self,
        progress: RequirementProgress,
    ) -> Result<RequirementProgress, RepositoryError>;

    fn insert_essay(&self, essay: Essay) -> Result<Essay, RepositoryError>;
    fn essay(&self, id: &EssayId) -> Result<Option<Essay>, RepositoryError>;
    /// Copies the review onto the essay and appends it to the review log in one step.
    fn record_review(&self, review: EssayReview) -> Result<Essay, RepositoryError>;
    fn essay_reviews(&self, essay_id: &EssayId) -> Result<Vec<EssayReview>, RepositoryError>;

    fn history(&self, enrollment_id: &EnrollmentId)
        -> Result<Vec<PromotionHistory>, RepositoryError>;

    /// Run `work` as a single transaction: either every write lands or none does.
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PromotionWriter) -> Result<T, E>,
        E: From<RepositoryError>;
}
