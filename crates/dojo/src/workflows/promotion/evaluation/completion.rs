use serde::{Deserialize, Serialize};

use super::super::domain::{BeltId, Essay, Requirement, RequirementKind, RequirementProgress};

/// Where a requirement's completion was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    Progress,
    Essay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub current_value: i32,
    pub is_complete: bool,
    pub source: CompletionSource,
}

/// Lookup of reviewed essays, the completion source for ESSAY requirements.
pub trait EssayLookup {
    /// Score of the most recently reviewed essay written for `belt_id`.
    fn reviewed_score_for(&self, belt_id: &BeltId) -> Option<u8>;
}

impl EssayLookup for [Essay] {
    fn reviewed_score_for(&self, belt_id: &BeltId) -> Option<u8> {
        self.iter()
            .filter(|essay| essay.target_belt_id.as_ref() == Some(belt_id))
            .filter_map(|essay| Some((essay.reviewed_at?, essay.score?)))
            .max_by_key(|(reviewed_at, _)| *reviewed_at)
            .map(|(_, score)| score)
    }
}

/// Completion of one requirement, dispatched on its kind.
pub fn evaluate_completion<L>(
    requirement: &Requirement,
    progress: Option<&RequirementProgress>,
    essays: &L,
) -> Completion
where
    L: EssayLookup + ?Sized,
{
    match requirement.kind {
        RequirementKind::Essay => {
            let score = essays.reviewed_score_for(&requirement.belt_id);
            Completion {
                current_value: score.map(i32::from).unwrap_or(0),
                is_complete: score.is_some(),
                source: CompletionSource::Essay,
            }
        }
        RequirementKind::MinAttendance
        | RequirementKind::Technique
        | RequirementKind::TimeInRank
        | RequirementKind::MinAge
        | RequirementKind::Custom => Completion {
            current_value: progress.map(|row| row.current_value).unwrap_or(0),
            is_complete: progress.map(|row| row.is_complete).unwrap_or(false),
            source: CompletionSource::Progress,
        },
    }
}
