use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed role taxonomy. `Other` keeps whatever an operator stored that is
/// not one of the known roles so it can still be loaded and reasoned about.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Role {
    Md,
    Admin,
    AccountsScm,
    ConcernManager,
    Employee,
    Other(String),
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "md" => Self::Md,
            "admin" => Self::Admin,
            "accounts/scm" | "accounts_scm" | "scm" => Self::AccountsScm,
            "concern manager" | "concern_manager" => Self::ConcernManager,
            "user" | "employee" => Self::Employee,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Md => "MD",
            Self::Admin => "Admin",
            Self::AccountsScm => "Accounts/SCM",
            Self::ConcernManager => "Concern Manager",
            Self::Employee => "User",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// Roles that see every request on the board.
    pub fn sees_all_requests(&self) -> bool {
        matches!(self, Self::Md | Self::Admin | Self::AccountsScm)
    }

    pub fn can_escalate(&self) -> bool {
        matches!(self, Self::Admin | Self::AccountsScm)
    }

    /// Roles allowed to activate or deactivate accounts and read the activity log.
    pub fn manages_users(&self) -> bool {
        matches!(self, Self::Md | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub floor: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn same_floor(&self, floor: Option<&str>) -> bool {
        match (self.floor.as_deref(), floor) {
            (Some(mine), Some(theirs)) => mine.trim().eq_ignore_ascii_case(theirs.trim()),
            _ => false,
        }
    }
}
