//! Capability checks shared by every workflow operation.
//!
//! Services never inspect roles directly; they describe the action and the scope of the
//! resource and ask [`authorize`].

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use super::ids::{SchoolId, StudentId, UserId};

pub const USER_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const SCHOOL_HEADER: &str = "x-school-id";
pub const STUDENT_HEADER: &str = "x-student-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Instructor,
    Owner,
    SuperAdmin,
    SchoolStaff,
    ItAdmin,
    Marketing,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Instructor => "INSTRUCTOR",
            Role::Owner => "OWNER",
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::SchoolStaff => "SCHOOL_STAFF",
            Role::ItAdmin => "IT_ADMIN",
            Role::Marketing => "MARKETING",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Some(Role::Student),
            "INSTRUCTOR" => Some(Role::Instructor),
            "OWNER" => Some(Role::Owner),
            "SUPER_ADMIN" => Some(Role::SuperAdmin),
            "SCHOOL_STAFF" => Some(Role::SchoolStaff),
            "IT_ADMIN" => Some(Role::ItAdmin),
            "MARKETING" => Some(Role::Marketing),
            _ => None,
        }
    }

    pub const fn is_staff(self) -> bool {
        !matches!(self, Role::Student)
    }

    const fn manages_school(self) -> bool {
        matches!(self, Role::Owner | Role::SchoolStaff)
    }
}

/// Identity of whoever is invoking a workflow operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
    pub school_id: Option<SchoolId>,
    pub student_id: Option<StudentId>,
}

impl Caller {
    pub fn staff(user_id: UserId, role: Role, school_id: SchoolId) -> Self {
        Self {
            user_id,
            role,
            school_id: Some(school_id),
            student_id: None,
        }
    }

    pub fn student(user_id: UserId, school_id: SchoolId, student_id: StudentId) -> Self {
        Self {
            user_id,
            role: Role::Student,
            school_id: Some(school_id),
            student_id: Some(student_id),
        }
    }

    pub fn super_admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::SuperAdmin,
            school_id: None,
            student_id: None,
        }
    }

    /// Rebuild the caller from the headers forwarded by the identity gateway.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AccessDenied> {
        let user_id = header_value(headers, USER_HEADER)
            .ok_or(AccessDenied::Unauthenticated(USER_HEADER))?;
        let role = header_value(headers, ROLE_HEADER)
            .and_then(Role::parse)
            .ok_or(AccessDenied::Unauthenticated(ROLE_HEADER))?;

        Ok(Self {
            user_id: UserId::new(user_id),
            role,
            school_id: header_value(headers, SCHOOL_HEADER).map(SchoolId::new),
            student_id: header_value(headers, STUDENT_HEADER).map(StudentId::new),
        })
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewCatalog,
    ManageCatalog,
    ManageGlobalCatalog,
    Enroll,
    ViewProgress,
    LogProgress,
    SubmitEssay,
    ReviewEssay,
    Promote,
    ViewBilling,
    ManageBilling,
    RunAutoInvoice,
}

impl Action {
    pub const fn label(self) -> &'static str {
        match self {
            Action::ViewCatalog => "view the catalog",
            Action::ManageCatalog => "manage the catalog",
            Action::ManageGlobalCatalog => "manage global programs",
            Action::Enroll => "manage enrollments",
            Action::ViewProgress => "view progress",
            Action::LogProgress => "log requirement progress",
            Action::SubmitEssay => "submit essays",
            Action::ReviewEssay => "review essays",
            Action::Promote => "promote students",
            Action::ViewBilling => "view billing",
            Action::ManageBilling => "manage billing",
            Action::RunAutoInvoice => "run auto-invoicing",
        }
    }
}

/// Where the resource being touched lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceScope {
    Platform,
    School(SchoolId),
    Student {
        school_id: SchoolId,
        student_id: StudentId,
    },
}

impl ResourceScope {
    fn school(&self) -> Option<&SchoolId> {
        match self {
            ResourceScope::Platform => None,
            ResourceScope::School(school_id) => Some(school_id),
            ResourceScope::Student { school_id, .. } => Some(school_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("missing or invalid identity header `{0}`")]
    Unauthenticated(&'static str),
    #[error("role {role} may not {action} in this scope")]
    Forbidden {
        role: &'static str,
        action: &'static str,
    },
}

/// The single capability check consulted by every service operation.
pub fn authorize(caller: &Caller, action: Action, scope: &ResourceScope) -> Result<(), AccessDenied> {
    let same_school = match (caller.school_id.as_ref(), scope.school()) {
        (Some(own), Some(target)) => own == target,
        _ => false,
    };
    let owns_resource = match scope {
        ResourceScope::Student { student_id, .. } => {
            caller.role == Role::Student
                && same_school
                && caller.student_id.as_ref() == Some(student_id)
        }
        _ => false,
    };

    let permitted = match (caller.role, action) {
        (Role::SuperAdmin, _) => true,
        (_, Action::RunAutoInvoice | Action::ManageGlobalCatalog) => false,
        (_, Action::ViewCatalog) => same_school,
        (role, Action::ManageCatalog | Action::ManageBilling) => {
            role.manages_school() && same_school
        }
        (role, Action::ViewBilling) => (role.manages_school() && same_school) || owns_resource,
        (Role::Student, Action::ViewProgress | Action::SubmitEssay) => owns_resource,
        (Role::Student, _) => false,
        (_, _) => same_school,
    };

    if permitted {
        Ok(())
    } else {
        Err(AccessDenied::Forbidden {
            role: caller.role.label(),
            action: action.label(),
        })
    }
}
