//! Belt promotion: the program catalog, requirement progress, essays, eligibility evaluation
//! and the transactional promotion step.

pub mod domain;
pub mod evaluation;
pub mod repository;
pub mod router;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use domain::{
    Belt, BeltId, BeltTestId, EnrollmentId, EnrollmentRequest, Essay, EssayId, EssayReview,
    EssayReviewRequest, EssaySubmission, NewBelt, NewProgram, NewRequirement, Program,
    ProgramEnrollment, ProgramId, ProgramOwnership, ProgramQuery, ProgressUpdate,
    PromotionHistory, PromotionRequest, Requirement, RequirementId, RequirementKind,
    RequirementProgress,
};
pub use evaluation::{
    BeltLadder, BeltStanding, CompletionSource, PromotionEvaluator, PromotionSnapshot,
    PromotionStatus, RequirementStatus,
};
pub use repository::{PromotionReader, PromotionRepository, PromotionWriter, RepositoryError};
pub use router::promotion_router;
pub use service::{PromotionService, PromotionServiceError};
pub use store::InMemoryPromotionStore;
