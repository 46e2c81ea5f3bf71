//! Strongly-typed row identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a [`Task`](crate::Task)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

/// Identifier of a [`SanitizerAuditRecord`](crate::SanitizerAuditRecord)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditId(i64);

macro_rules! row_id {
    ($ty:ident, $prefix:literal) => {
        impl $ty {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $ty {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl FromStr for $ty {
            type Err = std::num::ParseIntError;

            /// Accepts both `42` and the display form `task-42`.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s.trim().strip_prefix($prefix).unwrap_or(s.trim());
                digits.parse().map(Self)
            }
        }
    };
}

row_id!(TaskId, "task-");
row_id!(AuditId, "audit-");
