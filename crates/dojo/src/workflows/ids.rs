//! String identifiers minted from a process-wide sequence.

use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Produce a fresh `<prefix>-NNNNNN` identifier.
pub fn mint(prefix: &str) -> String {
    let id = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{id:06}")
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn mint() -> Self {
                Self($crate::workflows::ids::mint($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

pub(crate) use string_id;

string_id!(
    /// Tenant identifier supplied by the identity service.
    SchoolId,
    "school"
);
string_id!(
    /// Student identifier from the enrollment directory.
    StudentId,
    "student"
);
string_id!(
    /// Authenticated user (staff or student login).
    UserId,
    "user"
);
