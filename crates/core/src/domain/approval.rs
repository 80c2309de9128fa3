use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{ApprovalStage, RequestId};
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

/// Action written to the approval history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalAction {
    Approved,
    Rejected,
    EscalatedToMd,
}

impl ApprovalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::EscalatedToMd => "Escalated to MD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Approved" => Some(Self::Approved),
            "Rejected" => Some(Self::Rejected),
            "Escalated to MD" => Some(Self::EscalatedToMd),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision an approver can record against a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn action(self) -> ApprovalAction {
        match self {
            Self::Approve => ApprovalAction::Approved,
            Self::Reject => ApprovalAction::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub request_id: RequestId,
    pub stage: ApprovalStage,
    pub action: ApprovalAction,
    pub approver_id: UserId,
    pub comments: String,
    pub decided_at: DateTime<Utc>,
}
