//! Multi-level approval engine for asset requests.
//!
//! The chain a request walks through is chosen by the role of the user who
//! filed it, not by whoever is acting on it. Each requester role maps to an
//! ordered list of approver steps; level `n` of a request must be signed off
//! by the role at position `n` of that list. MD may act at any level and an
//! MD approval is always final.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalAction, ApprovalId, ApprovalRecord, Decision};
use crate::domain::request::{ApprovalStage, AssetRequest, RequestStatus};
use crate::domain::user::{Role, User};
use crate::errors::DomainError;

/// Chain length assumed for requester roles that have no chain of their own.
pub const DEFAULT_MAX_LEVEL: u8 = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverStep {
    pub role: Role,
    /// Approver must sit on the same floor as the request.
    pub same_floor: bool,
}

impl ApproverStep {
    pub fn role(role: Role) -> Self {
        Self { role, same_floor: false }
    }

    pub fn same_floor(role: Role) -> Self {
        Self { role, same_floor: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EligibilityFailure {
    OwnRequest,
    InactiveActor,
    TerminalStatus { status: RequestStatus },
    EscalatedToMd,
    NoChainForRequester { requester_role: Role },
    LevelOutOfRange { level: u8, max_level: u8 },
    WrongRole { actor_role: Role, required_role: Role },
    FloorMismatch { actor_floor: Option<String>, request_floor: Option<String> },
}

impl EligibilityFailure {
    fn reason(&self) -> String {
        match self {
            Self::OwnRequest => "users cannot approve their own requests".to_string(),
            Self::InactiveActor => "deactivated users cannot act on requests".to_string(),
            Self::TerminalStatus { status } => {
                format!("request is already {} and accepts no further action", status.as_str())
            }
            Self::EscalatedToMd => "request was escalated and awaits MD review".to_string(),
            Self::NoChainForRequester { requester_role } => {
                format!("no approval chain is defined for requester role `{requester_role}`")
            }
            Self::LevelOutOfRange { level, max_level } => {
                format!("approval level {level} is outside the chain (max level {max_level})")
            }
            Self::WrongRole { actor_role, required_role } => {
                format!("level requires `{required_role}`, actor is `{actor_role}`")
            }
            Self::FloorMismatch { actor_floor, request_floor } => format!(
                "concern manager floor `{}` does not match request floor `{}`",
                actor_floor.as_deref().unwrap_or("<none>"),
                request_floor.as_deref().unwrap_or("<none>")
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub allowed: bool,
    pub reason: String,
    pub required_role: Option<Role>,
    pub failure: Option<EligibilityFailure>,
}

impl Eligibility {
    fn allow(reason: impl Into<String>, required_role: Option<Role>) -> Self {
        Self { allowed: true, reason: reason.into(), required_role, failure: None }
    }

    fn deny(failure: EligibilityFailure, required_role: Option<Role>) -> Self {
        Self { allowed: false, reason: failure.reason(), required_role, failure: Some(failure) }
    }
}

/// Result of a recorded decision or escalation: the updated request plus the
/// history row that has to be persisted with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub request: AssetRequest,
    pub record: ApprovalRecord,
    pub previous_stage: ApprovalStage,
    pub previous_status: RequestStatus,
}

impl DecisionOutcome {
    pub fn new_status(&self) -> RequestStatus {
        self.request.status
    }

    pub fn advanced(&self) -> bool {
        self.request.status == RequestStatus::Pending && self.request.stage != self.previous_stage
    }
}

#[derive(Clone, Debug)]
pub struct ApprovalEngine {
    chains: HashMap<Role, Vec<ApproverStep>>,
}

impl Default for ApprovalEngine {
    fn default() -> Self {
        Self::standard()
    }
}

impl ApprovalEngine {
    pub fn new(chains: Vec<(Role, Vec<ApproverStep>)>) -> Self {
        Self { chains: chains.into_iter().collect() }
    }

    /// The organisation's hierarchy:
    ///
    /// | requester        | L1                          | L2           | L3           |
    /// |------------------|-----------------------------|--------------|--------------|
    /// | User / Employee  | Concern Manager, same floor | Admin        | Accounts/SCM |
    /// | Concern Manager  | Admin                       | Accounts/SCM |              |
    /// | Admin            | Accounts/SCM                |              |              |
    /// | Accounts/SCM     | Admin                       |              |              |
    pub fn standard() -> Self {
        Self::new(vec![
            (
                Role::Employee,
                vec![
                    ApproverStep::same_floor(Role::ConcernManager),
                    ApproverStep::role(Role::Admin),
                    ApproverStep::role(Role::AccountsScm),
                ],
            ),
            (
                Role::ConcernManager,
                vec![ApproverStep::role(Role::Admin), ApproverStep::role(Role::AccountsScm)],
            ),
            (Role::Admin, vec![ApproverStep::role(Role::AccountsScm)]),
            (Role::AccountsScm, vec![ApproverStep::role(Role::Admin)]),
        ])
    }

    pub fn chain_for(&self, requester_role: &Role) -> Option<&[ApproverStep]> {
        self.chains.get(requester_role).map(Vec::as_slice)
    }

    pub fn max_level(&self, requester_role: &Role) -> u8 {
        self.chain_for(requester_role)
            .and_then(|chain| u8::try_from(chain.len()).ok())
            .filter(|len| *len > 0)
            .unwrap_or(DEFAULT_MAX_LEVEL)
    }

    /// Approver step a request is waiting on, if its stage maps into a chain.
    pub fn required_step(&self, request: &AssetRequest) -> Option<&ApproverStep> {
        let ApprovalStage::Level { level } = request.stage else {
            return None;
        };
        let index = usize::from(level).checked_sub(1)?;
        self.chain_for(&request.requester_role)?.get(index)
    }

    /// Who a pending request is waiting on, e.g. `Concern Manager (2nd floor)`.
    /// `None` once the request is closed.
    pub fn awaiting_label(&self, request: &AssetRequest) -> Option<String> {
        if request.status.is_terminal() {
            return None;
        }
        let label = match self.required_step(request) {
            Some(step) if step.same_floor => format!(
                "{} ({} floor)",
                step.role,
                request.floor.as_deref().unwrap_or("unassigned")
            ),
            Some(step) => step.role.to_string(),
            None => Role::Md.to_string(),
        };
        Some(label)
    }

    pub fn can_approve(&self, actor: &User, request: &AssetRequest) -> bool {
        self.eligibility(actor, request).allowed
    }

    pub fn eligibility(&self, actor: &User, request: &AssetRequest) -> Eligibility {
        if request.is_owned_by(&actor.id) {
            return Eligibility::deny(EligibilityFailure::OwnRequest, None);
        }

        if !actor.is_active {
            return Eligibility::deny(EligibilityFailure::InactiveActor, None);
        }

        if request.status.is_terminal() {
            return Eligibility::deny(
                EligibilityFailure::TerminalStatus { status: request.status },
                None,
            );
        }

        if actor.role == Role::Md {
            return Eligibility::allow(
                format!("MD `{}` may act on request {} at any level", actor.id, request.id),
                Some(Role::Md),
            );
        }

        let level = match request.stage {
            ApprovalStage::Escalated { .. } => {
                return Eligibility::deny(EligibilityFailure::EscalatedToMd, Some(Role::Md));
            }
            ApprovalStage::Level { level } => level,
        };

        let Some(chain) = self.chain_for(&request.requester_role) else {
            return Eligibility::deny(
                EligibilityFailure::NoChainForRequester {
                    requester_role: request.requester_role.clone(),
                },
                Some(Role::Md),
            );
        };

        let Some(step) = usize::from(level).checked_sub(1).and_then(|index| chain.get(index))
        else {
            return Eligibility::deny(
                EligibilityFailure::LevelOutOfRange {
                    level,
                    max_level: self.max_level(&request.requester_role),
                },
                None,
            );
        };

        if actor.role != step.role {
            return Eligibility::deny(
                EligibilityFailure::WrongRole {
                    actor_role: actor.role.clone(),
                    required_role: step.role.clone(),
                },
                Some(step.role.clone()),
            );
        }

        if step.same_floor && !actor.same_floor(request.floor.as_deref()) {
            return Eligibility::deny(
                EligibilityFailure::FloorMismatch {
                    actor_floor: actor.floor.clone(),
                    request_floor: request.floor.clone(),
                },
                Some(step.role.clone()),
            );
        }

        Eligibility::allow(
            format!("`{}` is the level {level} approver for request {}", actor.role, request.id),
            Some(step.role.clone()),
        )
    }

    /// Records `decision` and advances or closes the request. The caller is
    /// expected to have passed [`Self::can_approve`]; only the terminal-state
    /// guard is enforced here.
    pub fn apply_decision(
        &self,
        actor: &User,
        request: &AssetRequest,
        decision: Decision,
        comments: &str,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, DomainError> {
        ensure_open(request)?;

        let mut updated = request.clone();
        match decision {
            Decision::Reject => updated.status = RequestStatus::Rejected,
            Decision::Approve if actor.role == Role::Md => updated.status = RequestStatus::Approved,
            Decision::Approve => match request.stage {
                ApprovalStage::Level { level }
                    if level < self.max_level(&request.requester_role) =>
                {
                    updated.stage = ApprovalStage::level(level + 1);
                    updated.status = RequestStatus::Pending;
                }
                ApprovalStage::Level { .. } | ApprovalStage::Escalated { .. } => {
                    updated.status = RequestStatus::Approved;
                }
            },
        }
        updated.updated_at = now;

        let record = history_record(request, actor, decision.action(), comments.trim(), now);
        Ok(DecisionOutcome {
            request: updated,
            record,
            previous_stage: request.stage,
            previous_status: request.status,
        })
    }

    /// Gate plus transition: terminal requests fail with `InvalidState`,
    /// ineligible actors with `PermissionDenied`.
    pub fn decide(
        &self,
        actor: &User,
        request: &AssetRequest,
        decision: Decision,
        comments: &str,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, DomainError> {
        ensure_open(request)?;

        let eligibility = self.eligibility(actor, request);
        if !eligibility.allowed {
            return Err(DomainError::permission_denied(eligibility.reason));
        }

        self.apply_decision(actor, request, decision, comments, now)
    }

    /// Routes a pending request straight to MD review.
    pub fn escalate(
        &self,
        actor: &User,
        request: &AssetRequest,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, DomainError> {
        if !actor.role.can_escalate() || !actor.is_active {
            return Err(DomainError::permission_denied(format!(
                "role `{}` cannot escalate requests to MD",
                actor.role
            )));
        }
        if request.is_owned_by(&actor.id) {
            return Err(DomainError::permission_denied("users cannot escalate their own requests"));
        }
        ensure_open(request)?;

        let ApprovalStage::Level { level } = request.stage else {
            return Err(DomainError::InvalidInput(format!(
                "request {} is already escalated to MD",
                request.id
            )));
        };

        let mut updated = request.clone();
        updated.stage = ApprovalStage::Escalated { from_level: level };
        updated.updated_at = now;

        let comments = format!("Escalated to MD. Reason: {}", reason.trim());
        let record = history_record(request, actor, ApprovalAction::EscalatedToMd, &comments, now);
        Ok(DecisionOutcome {
            request: updated,
            record,
            previous_stage: request.stage,
            previous_status: request.status,
        })
    }
}

fn ensure_open(request: &AssetRequest) -> Result<(), DomainError> {
    if request.status.is_terminal() {
        return Err(DomainError::InvalidState {
            request_id: request.id.clone(),
            status: request.status,
        });
    }
    Ok(())
}

fn history_record(
    request: &AssetRequest,
    actor: &User,
    action: ApprovalAction,
    comments: &str,
    now: DateTime<Utc>,
) -> ApprovalRecord {
    ApprovalRecord {
        id: ApprovalId(format!("APV-{}", Uuid::new_v4().simple())),
        request_id: request.id.clone(),
        stage: request.stage,
        action,
        approver_id: actor.id.clone(),
        comments: comments.to_string(),
        decided_at: now,
    }
}
