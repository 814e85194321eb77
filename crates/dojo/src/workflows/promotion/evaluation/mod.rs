mod completion;
mod ladder;

pub use completion::{evaluate_completion, Completion, CompletionSource, EssayLookup};
pub use ladder::BeltLadder;

use serde::{Deserialize, Serialize};

use super::domain::{
    Belt, EnrollmentId, Essay, Program, ProgramEnrollment, ProgramId, Requirement,
    RequirementProgress,
};
use super::repository::{PromotionReader, RepositoryError};

/// Everything the evaluator reads for one enrollment.
#[derive(Debug, Clone)]
pub struct PromotionSnapshot {
    pub enrollment: ProgramEnrollment,
    pub program: Program,
    pub ladder: BeltLadder,
    /// Requirements of the next belt only.
    pub requirements: Vec<Requirement>,
    pub progress: Vec<RequirementProgress>,
    pub essays: Vec<Essay>,
}

impl PromotionSnapshot {
    pub fn load<R>(reader: &R, enrollment_id: &EnrollmentId) -> Result<Self, SnapshotError>
    where
        R: PromotionReader + ?Sized,
    {
        let enrollment = reader
            .enrollment(enrollment_id)?
            .ok_or(SnapshotError::Missing("enrollment"))?;
        let program = reader
            .program(&enrollment.program_id)?
            .ok_or(SnapshotError::Missing("program"))?;

        let ladder = if program.has_rank_structure {
            BeltLadder::new(reader.belts(&program.id)?)
        } else {
            BeltLadder::default()
        };

        let current_order = match &enrollment.current_belt_id {
            Some(belt_id) => Some(
                ladder
                    .find(belt_id)
                    .ok_or(SnapshotError::Missing("current belt"))?
                    .display_order,
            ),
            None => None,
        };

        let requirements = match ladder.next_after(current_order) {
            Some(next) => reader.requirements(&next.id)?,
            None => Vec::new(),
        };

        Ok(Self {
            progress: reader.progress(&enrollment.id)?,
            essays: reader.essays(&enrollment.id)?,
            enrollment,
            program,
            ladder,
            requirements,
        })
    }

    pub fn current_belt(&self) -> Option<&Belt> {
        self.enrollment
            .current_belt_id
            .as_ref()
            .and_then(|belt_id| self.ladder.find(belt_id))
    }

    pub fn next_belt(&self) -> Option<&Belt> {
        self.ladder
            .next_after(self.current_belt().map(|belt| belt.display_order))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("{0} not found")]
    Missing(&'static str),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Stateless evaluator turning a snapshot into a promotion status.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromotionEvaluator;

impl PromotionEvaluator {
    pub fn evaluate(&self, snapshot: &PromotionSnapshot) -> PromotionStatus {
        let current_belt = snapshot.current_belt().cloned();
        let current_order = current_belt.as_ref().map(|belt| belt.display_order);
        let next_belt = snapshot.next_belt().cloned();

        let all_belts = snapshot
            .ladder
            .belts()
            .iter()
            .map(|belt| BeltStanding {
                is_achieved: current_order.is_some_and(|order| belt.display_order <= order),
                is_current: current_belt.as_ref().map(|current| &current.id) == Some(&belt.id),
                belt: belt.clone(),
            })
            .collect();

        let requirements: Vec<RequirementStatus> = snapshot
            .requirements
            .iter()
            .map(|requirement| {
                let progress = snapshot
                    .progress
                    .iter()
                    .find(|row| row.requirement_id == requirement.id);
                let completion =
                    evaluate_completion(requirement, progress, snapshot.essays.as_slice());
                RequirementStatus {
                    requirement: requirement.clone(),
                    current_value: completion.current_value,
                    is_complete: completion.is_complete,
                    source: completion.source,
                }
            })
            .collect();

        let ready_for_promotion = next_belt.is_some()
            && requirements
                .iter()
                .filter(|status| status.requirement.is_required)
                .all(|status| status.is_complete);

        PromotionStatus {
            enrollment_id: snapshot.enrollment.id.clone(),
            program_id: snapshot.program.id.clone(),
            highest_rank_achieved: next_belt.is_none(),
            current_belt,
            all_belts,
            next_belt,
            requirements,
            ready_for_promotion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeltStanding {
    #[serde(flatten)]
    pub belt: Belt,
    pub is_achieved: bool,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementStatus {
    #[serde(flatten)]
    pub requirement: Requirement,
    pub current_value: i32,
    pub is_complete: bool,
    pub source: CompletionSource,
}

/// Evaluation output for one enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionStatus {
    pub enrollment_id: EnrollmentId,
    pub program_id: ProgramId,
    pub current_belt: Option<Belt>,
    pub all_belts: Vec<BeltStanding>,
    pub next_belt: Option<Belt>,
    pub requirements: Vec<RequirementStatus>,
    pub ready_for_promotion: bool,
    pub highest_rank_achieved: bool,
}

impl PromotionStatus {
    /// Required requirements still blocking promotion.
    pub fn missing(&self) -> impl Iterator<Item = &RequirementStatus> {
        self.requirements
            .iter()
            .filter(|status| status.requirement.is_required && !status.is_complete)
    }

    pub fn summary(&self) -> String {
        match &self.next_belt {
            None => "highest rank achieved".to_string(),
            Some(next) if self.ready_for_promotion => format!("ready for {}", next.name),
            Some(next) => {
                let outstanding: Vec<_> = self
                    .missing()
                    .map(|status| status.requirement.description.as_str())
                    .collect();
                format!("working toward {}: {}", next.name, outstanding.join(", "))
            }
        }
    }
}
