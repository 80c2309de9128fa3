use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::{Role, User, UserId};
use crate::errors::DomainError;

/// Numeric level the legacy schema used to mark an escalation.
pub const LEGACY_ESCALATION_LEVEL: u16 = 999;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Fulfilled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Fulfilled => "fulfilled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "fulfilled" => Some(Self::Fulfilled),
            _ => None,
        }
    }
}

/// Where a pending request sits in its approval chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalStage {
    Level { level: u8 },
    Escalated { from_level: u8 },
}

impl ApprovalStage {
    pub const INITIAL: Self = Self::Level { level: 1 };

    pub fn level(level: u8) -> Self {
        Self::Level { level }
    }

    pub fn is_escalated(self) -> bool {
        matches!(self, Self::Escalated { .. })
    }

    /// Level the chain had reached; for an escalation, the level it left from.
    pub fn chain_level(self) -> u8 {
        match self {
            Self::Level { level } => level,
            Self::Escalated { from_level } => from_level,
        }
    }

    pub fn legacy_level(self) -> u16 {
        match self {
            Self::Level { level } => u16::from(level),
            Self::Escalated { .. } => LEGACY_ESCALATION_LEVEL,
        }
    }
}

impl fmt::Display for ApprovalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level { level } => write!(f, "level {level}"),
            Self::Escalated { from_level } => write!(f, "escalated to MD from level {from_level}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Normal => "Normal",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" | "" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" | "urgent" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAssetRequest {
    pub item_name: String,
    pub quantity: u32,
    pub purpose: String,
    pub request_type: String,
    pub estimated_cost: Option<Decimal>,
    #[serde(default)]
    pub urgency: Urgency,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetRequest {
    pub id: RequestId,
    pub owner_id: UserId,
    pub requester_role: Role,
    pub floor: Option<String>,
    pub item_name: String,
    pub quantity: u32,
    pub purpose: String,
    pub request_type: String,
    pub estimated_cost: Option<Decimal>,
    pub urgency: Urgency,
    pub status: RequestStatus,
    pub stage: ApprovalStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssetRequest {
    /// Builds a pending level-1 request owned by `owner`, copying the
    /// owner's role and floor onto the request.
    pub fn submit(
        id: RequestId,
        owner: &User,
        input: NewAssetRequest,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let item_name = required_text("item_name", &input.item_name)?;
        let purpose = required_text("purpose", &input.purpose)?;
        let request_type = required_text("request_type", &input.request_type)?;

        if input.quantity == 0 {
            return Err(DomainError::InvalidInput("quantity must be at least 1".to_string()));
        }
        if input.estimated_cost.is_some_and(|cost| cost.is_sign_negative()) {
            return Err(DomainError::InvalidInput(
                "estimated_cost must not be negative".to_string(),
            ));
        }

        Ok(Self {
            id,
            owner_id: owner.id.clone(),
            requester_role: owner.role.clone(),
            floor: owner.floor.clone(),
            item_name,
            quantity: input.quantity,
            purpose,
            request_type,
            estimated_cost: input.estimated_cost,
            urgency: input.urgency,
            status: RequestStatus::Pending,
            stage: ApprovalStage::INITIAL,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.owner_id == user_id
    }
}

fn required_text(field: &str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidInput(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}
