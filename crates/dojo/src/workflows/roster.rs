//! Enrollment directory consulted by both workflows before touching a student.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::workflows::ids::{SchoolId, StudentId};
use crate::workflows::storage::RepositoryError;

/// Roster entry served by the enrollment directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: StudentId,
    pub school_id: SchoolId,
    pub name: String,
}

/// Read access to the school rosters.
pub trait StudentDirectory: Send + Sync {
    fn student(&self, id: &StudentId) -> Result<Option<StudentRecord>, RepositoryError>;
}

/// Mutex-guarded roster; stands in for the external enrollment directory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRoster {
    students: Arc<Mutex<HashMap<StudentId, StudentRecord>>>,
}

impl InMemoryRoster {
    fn students(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<StudentId, StudentRecord>>, RepositoryError> {
        self.students
            .lock()
            .map_err(|_| RepositoryError::Unavailable("roster mutex poisoned".to_string()))
    }

    /// Add or replace a roster entry.
    pub fn register(&self, record: StudentRecord) -> Result<(), RepositoryError> {
        self.students()?.insert(record.id.clone(), record);
        Ok(())
    }
}

impl StudentDirectory for InMemoryRoster {
    fn student(&self, id: &StudentId) -> Result<Option<StudentRecord>, RepositoryError> {
        Ok(self.students()?.get(id).cloned())
    }
}
