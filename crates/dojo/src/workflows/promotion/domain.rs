use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::ids::{string_id, SchoolId, StudentId, UserId};

string_id!(
    /// Curriculum program (Karate, BJJ, Little Dragons, ...).
    ProgramId,
    "prg"
);
string_id!(BeltId, "belt");
string_id!(RequirementId, "req");
string_id!(EnrollmentId, "enr");
string_id!(ProgressId, "prog");
string_id!(PromotionId, "promo");
string_id!(EssayId, "essay");
string_id!(EssayReviewId, "review");
string_id!(
    /// Optional link from an essay to a scheduled belt test.
    BeltTestId,
    "test"
);

/// Whether a program belongs to one school or is shared across every tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "school_id", rename_all = "snake_case")]
pub enum ProgramOwnership {
    School(SchoolId),
    Global,
}

impl ProgramOwnership {
    pub fn visible_to(&self, school_id: &SchoolId) -> bool {
        match self {
            ProgramOwnership::School(owner) => owner == school_id,
            ProgramOwnership::Global => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    pub description: Option<String>,
    pub ownership: ProgramOwnership,
    pub has_rank_structure: bool,
    pub is_active: bool,
}

/// A rank inside a program. Higher `display_order` means higher rank; 1 is the lowest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Belt {
    pub id: BeltId,
    pub program_id: ProgramId,
    pub name: String,
    pub display_order: u32,
    pub color: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequirementKind {
    MinAttendance,
    Technique,
    TimeInRank,
    MinAge,
    Essay,
    Custom,
}

impl RequirementKind {
    pub const fn label(self) -> &'static str {
        match self {
            RequirementKind::MinAttendance => "minimum attendance",
            RequirementKind::Technique => "technique",
            RequirementKind::TimeInRank => "time in rank",
            RequirementKind::MinAge => "minimum age",
            RequirementKind::Essay => "essay",
            RequirementKind::Custom => "custom",
        }
    }
}

/// Criterion attached to a belt. Non-required requirements are informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: RequirementId,
    pub belt_id: BeltId,
    pub kind: RequirementKind,
    pub description: String,
    pub value: Option<i32>,
    pub is_required: bool,
}

/// A student's membership in a program. `current_belt_id = None` means unranked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEnrollment {
    pub id: EnrollmentId,
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub program_id: ProgramId,
    pub current_belt_id: Option<BeltId>,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementProgress {
    pub id: ProgressId,
    pub enrollment_id: EnrollmentId,
    pub requirement_id: RequirementId,
    pub current_value: i32,
    pub is_complete: bool,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row written by every promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionHistory {
    pub id: PromotionId,
    pub enrollment_id: EnrollmentId,
    pub from_belt_id: Option<BeltId>,
    pub to_belt_id: BeltId,
    pub promoted_by: UserId,
    pub promoted_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Written submission; only the review fields change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Essay {
    pub id: EssayId,
    pub enrollment_id: EnrollmentId,
    pub test_id: Option<BeltTestId>,
    pub target_belt_id: Option<BeltId>,
    pub title: String,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
    pub score: Option<u8>,
    pub feedback: Option<String>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Essay {
    pub fn is_reviewed(&self) -> bool {
        self.score.is_some()
    }
}

/// One review pass over an essay; re-reviews append rather than overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssayReview {
    pub id: EssayReviewId,
    pub essay_id: EssayId,
    pub score: u8,
    pub feedback: Option<String>,
    pub reviewed_by: UserId,
    pub reviewed_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProgram {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Shared with every school; only super admins may author these.
    #[serde(default)]
    pub global: bool,
    #[serde(default = "default_true")]
    pub has_rank_structure: bool,
    /// Owning school for school-scoped programs; defaults to the caller's school.
    #[serde(default)]
    pub school_id: Option<SchoolId>,
}

/// Catalog listing filter; platform callers name the school they are browsing for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramQuery {
    #[serde(default)]
    pub school_id: Option<SchoolId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBelt {
    pub name: String,
    pub display_order: u32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequirement {
    pub kind: RequirementKind,
    pub description: String,
    #[serde(default)]
    pub value: Option<i32>,
    #[serde(default = "default_true")]
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub student_id: StudentId,
    pub program_id: ProgramId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub current_value: i32,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssaySubmission {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub test_id: Option<BeltTestId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssayReviewRequest {
    pub score: i32,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// A promotion always names the belt being granted; a mismatch means someone else already
/// promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub target_belt_id: BeltId,
    #[serde(default)]
    pub notes: Option<String>,
}

impl PromotionRequest {
    pub fn to(target_belt_id: BeltId) -> Self {
        Self {
            target_belt_id,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
