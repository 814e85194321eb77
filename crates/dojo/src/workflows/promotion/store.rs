use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{
    Belt, BeltId, EnrollmentId, Essay, EssayId, EssayReview, Program, ProgramEnrollment,
    ProgramId, PromotionHistory, Requirement, RequirementId, RequirementProgress,
};
use super::repository::{PromotionReader, PromotionRepository, PromotionWriter, RepositoryError};
use crate::workflows::ids::SchoolId;

#[derive(Debug, Default, Clone)]
struct PromotionTables {
    programs: BTreeMap<ProgramId, Program>,
    belts: BTreeMap<BeltId, Belt>,
    requirements: BTreeMap<RequirementId, Requirement>,
    enrollments: BTreeMap<EnrollmentId, ProgramEnrollment>,
    progress: BTreeMap<(EnrollmentId, RequirementId), RequirementProgress>,
    history: Vec<PromotionHistory>,
    essays: BTreeMap<EssayId, Essay>,
    reviews: Vec<EssayReview>,
}

impl PromotionReader for PromotionTables {
    fn program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError> {
        Ok(self.programs.get(id).cloned())
    }

    fn belts(&self, program_id: &ProgramId) -> Result<Vec<Belt>, RepositoryError> {
        Ok(self
            .belts
            .values()
            .filter(|belt| &belt.program_id == program_id)
            .cloned()
            .collect())
    }

    fn belt(&self, id: &BeltId) -> Result<Option<Belt>, RepositoryError> {
        Ok(self.belts.get(id).cloned())
    }

    fn requirements(&self, belt_id: &BeltId) -> Result<Vec<Requirement>, RepositoryError> {
        Ok(self
            .requirements
            .values()
            .filter(|requirement| &requirement.belt_id == belt_id)
            .cloned()
            .collect())
    }

    fn requirement(&self, id: &RequirementId) -> Result<Option<Requirement>, RepositoryError> {
        Ok(self.requirements.get(id).cloned())
    }

    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<ProgramEnrollment>, RepositoryError> {
        Ok(self.enrollments.get(id).cloned())
    }

    fn progress(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<RequirementProgress>, RepositoryError> {
        Ok(self
            .progress
            .values()
            .filter(|row| &row.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }

    fn essays(&self, enrollment_id: &EnrollmentId) -> Result<Vec<Essay>, RepositoryError> {
        let mut essays: Vec<Essay> = self
            .essays
            .values()
            .filter(|essay| &essay.enrollment_id == enrollment_id)
            .cloned()
            .collect();
        essays.sort_by_key(|essay| essay.submitted_at);
        Ok(essays)
    }
}

impl PromotionWriter for PromotionTables {
    fn set_current_belt(
        &mut self,
        enrollment_id: &EnrollmentId,
        belt_id: &BeltId,
    ) -> Result<(), RepositoryError> {
        let enrollment = self
            .enrollments
            .get_mut(enrollment_id)
            .ok_or(RepositoryError::NotFound)?;
        enrollment.current_belt_id = Some(belt_id.clone());
        Ok(())
    }

    fn append_history(&mut self, entry: PromotionHistory) -> Result<(), RepositoryError> {
        if !self.enrollments.contains_key(&entry.enrollment_id) {
            return Err(RepositoryError::NotFound);
        }
        self.history.push(entry);
        Ok(())
    }
}

/// Mutex-guarded store; `atomically` works on a copy and swaps it in only on success.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPromotionStore {
    tables: Arc<Mutex<PromotionTables>>,
}

impl InMemoryPromotionStore {
    fn tables(&self) -> Result<MutexGuard<'_, PromotionTables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("promotion store mutex poisoned".to_string()))
    }
}

impl PromotionReader for InMemoryPromotionStore {
    fn program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError> {
        self.tables()?.program(id)
    }

    fn belts(&self, program_id: &ProgramId) -> Result<Vec<Belt>, RepositoryError> {
        self.tables()?.belts(program_id)
    }

    fn belt(&self, id: &BeltId) -> Result<Option<Belt>, RepositoryError> {
        self.tables()?.belt(id)
    }

    fn requirements(&self, belt_id: &BeltId) -> Result<Vec<Requirement>, RepositoryError> {
        self.tables()?.requirements(belt_id)
    }

    fn requirement(&self, id: &RequirementId) -> Result<Option<Requirement>, RepositoryError> {
        self.tables()?.requirement(id)
    }

    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<ProgramEnrollment>, RepositoryError> {
        self.tables()?.enrollment(id)
    }

    fn progress(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<RequirementProgress>, RepositoryError> {
        self.tables()?.progress(enrollment_id)
    }

    fn essays(&self, enrollment_id: &EnrollmentId) -> Result<Vec<Essay>, RepositoryError> {
        self.tables()?.essays(enrollment_id)
    }
}

impl PromotionRepository for InMemoryPromotionStore {
    fn insert_program(&self, program: Program) -> Result<Program, RepositoryError> {
        let mut tables = self.tables()?;
        if tables.programs.contains_key(&program.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.programs.insert(program.id.clone(), program.clone());
        Ok(program)
    }

    fn programs_visible_to(&self, school_id: &SchoolId) -> Result<Vec<Program>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .programs
            .values()
            .filter(|program| program.ownership.visible_to(school_id))
            .cloned()
            .collect())
    }

    fn insert_belt(&self, belt: Belt) -> Result<Belt, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.programs.contains_key(&belt.program_id) {
            return Err(RepositoryError::NotFound);
        }
        let order_taken = tables.belts.values().any(|existing| {
            existing.program_id == belt.program_id && existing.display_order == belt.display_order
        });
        if order_taken || tables.belts.contains_key(&belt.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.belts.insert(belt.id.clone(), belt.clone());
        Ok(belt)
    }

    fn insert_requirement(
        &self,
        requirement: Requirement,
    ) -> Result<Requirement, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.belts.contains_key(&requirement.belt_id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.requirements.contains_key(&requirement.id) {
            return Err(RepositoryError::Conflict);
        }
        tables
            .requirements
            .insert(requirement.id.clone(), requirement.clone());
        Ok(requirement)
    }

    fn insert_enrollment(
        &self,
        enrollment: ProgramEnrollment,
    ) -> Result<ProgramEnrollment, RepositoryError> {
        let mut tables = self.tables()?;
        let duplicate = tables.enrollments.values().any(|existing| {
            existing.student_id == enrollment.student_id
                && existing.program_id == enrollment.program_id
        });
        if duplicate || tables.enrollments.contains_key(&enrollment.id) {
            return Err(RepositoryError::Conflict);
        }
        tables
            .enrollments
            .insert(enrollment.id.clone(), enrollment.clone());
        Ok(enrollment)
    }

    fn remove_enrollment(&self, id: &EnrollmentId) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        tables
            .enrollments
            .remove(id)
            .ok_or(RepositoryError::NotFound)?;

        tables.progress.retain(|(enrollment_id, _), _| enrollment_id != id);
        tables.history.retain(|entry| &entry.enrollment_id != id);

        let removed: Vec<EssayId> = tables
            .essays
            .values()
            .filter(|essay| &essay.enrollment_id == id)
            .map(|essay| essay.id.clone())
            .collect();
        tables.essays.retain(|_, essay| &essay.enrollment_id != id);
        tables
            .reviews
            .retain(|review| !removed.contains(&review.essay_id));
        Ok(())
    }

    fn upsert_progress(
        &self,
        progress: RequirementProgress,
    ) -> Result<RequirementProgress, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.enrollments.contains_key(&progress.enrollment_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = (
            progress.enrollment_id.clone(),
            progress.requirement_id.clone(),
        );
        let stored = match tables.progress.get(&key) {
            Some(existing) => RequirementProgress {
                id: existing.id.clone(),
                ..progress
            },
            None => progress,
        };
        tables.progress.insert(key, stored.clone());
        Ok(stored)
    }

    fn insert_essay(&self, essay: Essay) -> Result<Essay, RepositoryError> {
        let mut tables = self.tables()?;
        if !tables.enrollments.contains_key(&essay.enrollment_id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.essays.contains_key(&essay.id) {
            return Err(RepositoryError::Conflict);
        }
        tables.essays.insert(essay.id.clone(), essay.clone());
        Ok(essay)
    }

    fn essay(&self, id: &EssayId) -> Result<Option<Essay>, RepositoryError> {
        Ok(self.tables()?.essays.get(id).cloned())
    }

    fn record_review(&self, review: EssayReview) -> Result<Essay, RepositoryError> {
        let mut tables = self.tables()?;
        let essay = tables
            .essays
            .get_mut(&review.essay_id)
            .ok_or(RepositoryError::NotFound)?;
        essay.score = Some(review.score);
        essay.feedback = review.feedback.clone();
        essay.reviewed_by = Some(review.reviewed_by.clone());
        essay.reviewed_at = Some(review.reviewed_at);
        let updated = essay.clone();
        tables.reviews.push(review);
        Ok(updated)
    }

    fn essay_reviews(&self, essay_id: &EssayId) -> Result<Vec<EssayReview>, RepositoryError> {
        Ok(self
            .tables()?
            .reviews
            .iter()
            .filter(|review| &review.essay_id == essay_id)
            .cloned()
            .collect())
    }

    fn history(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<PromotionHistory>, RepositoryError> {
        Ok(self
            .tables()?
            .history
            .iter()
            .filter(|entry| &entry.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }

    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn PromotionWriter) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut tables = self.tables()?;
        let mut working = tables.clone();
        let outcome = work(&mut working)?;
        *tables = working;
        Ok(outcome)
    }
}
