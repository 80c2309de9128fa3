use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::{AssetRequest, RequestId};
use crate::domain::user::{User, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityAction {
    RequestCreated,
    RequestApproved,
    RequestRejected,
    RequestEscalated,
    UserStatusChanged,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestCreated => "Request Created",
            Self::RequestApproved => "Request Approved",
            Self::RequestRejected => "Request Rejected",
            Self::RequestEscalated => "Request Escalated",
            Self::UserStatusChanged => "User Status Changed",
        }
    }
}

/// One row of the generic activity log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub user_id: UserId,
    /// Stored as text so entries written by other tools still load.
    pub action: String,
    pub description: String,
    pub request_id: Option<RequestId>,
    pub ip_address: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        user_id: UserId,
        action: ActivityAction,
        description: impl Into<String>,
        request_id: Option<RequestId>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            action: action.as_str().to_string(),
            description: description.into(),
            request_id,
            ip_address: None,
            occurred_at,
        }
    }

    pub fn request_created(actor: &UserId, request: &AssetRequest, now: DateTime<Utc>) -> Self {
        Self::new(
            actor.clone(),
            ActivityAction::RequestCreated,
            format!("Created asset request #{} - {}", request.id, request.item_name),
            Some(request.id.clone()),
            now,
        )
    }

    pub fn request_approved(actor: &UserId, request: &AssetRequest, now: DateTime<Utc>) -> Self {
        Self::new(
            actor.clone(),
            ActivityAction::RequestApproved,
            format!("Approved request #{} - {}", request.id, request.item_name),
            Some(request.id.clone()),
            now,
        )
    }

    pub fn request_rejected(actor: &UserId, request: &AssetRequest, now: DateTime<Utc>) -> Self {
        Self::new(
            actor.clone(),
            ActivityAction::RequestRejected,
            format!("Rejected request #{} - {}", request.id, request.item_name),
            Some(request.id.clone()),
            now,
        )
    }

    pub fn request_escalated(
        actor: &UserId,
        request: &AssetRequest,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            actor.clone(),
            ActivityAction::RequestEscalated,
            format!("Escalated request #{} to MD. Reason: {}", request.id, reason.trim()),
            Some(request.id.clone()),
            now,
        )
    }

    /// Written after `user` has been flipped, so `is_active` is the new state.
    pub fn user_status_changed(actor: &UserId, user: &User, now: DateTime<Utc>) -> Self {
        let status = if user.is_active { "activated" } else { "deactivated" };
        Self::new(
            actor.clone(),
            ActivityAction::UserStatusChanged,
            format!("User {} {status}", user.username),
            None,
            now,
        )
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::audit::ActivityEntry;
    use crate::domain::request::{
        ApprovalStage, AssetRequest, RequestId, RequestStatus, Urgency,
    };
    use crate::domain::user::{Role, User, UserId};

    fn laptop_request() -> AssetRequest {
        let now = Utc::now();
        AssetRequest {
            id: RequestId("REQ-7".to_owned()),
            owner_id: UserId("u-emp".to_owned()),
            requester_role: Role::Employee,
            floor: Some("2nd".to_owned()),
            item_name: "Laptop".to_owned(),
            quantity: 1,
            purpose: "Replacement".to_owned(),
            request_type: "Fixed Asset".to_owned(),
            estimated_cost: None,
            urgency: Urgency::Normal,
            status: RequestStatus::Pending,
            stage: ApprovalStage::INITIAL,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn decision_entries_use_activity_log_wording() {
        let actor = UserId("u-cm".to_owned());
        let request = laptop_request();

        let approved = ActivityEntry::request_approved(&actor, &request, Utc::now());
        let rejected = ActivityEntry::request_rejected(&actor, &request, Utc::now())
            .with_ip_address("10.0.0.8");

        assert_eq!(approved.action, "Request Approved");
        assert_eq!(approved.description, "Approved request #REQ-7 - Laptop");
        assert_eq!(approved.ip_address, None);
        assert_eq!(rejected.action, "Request Rejected");
        assert_eq!(rejected.ip_address.as_deref(), Some("10.0.0.8"));
        assert_eq!(rejected.request_id, Some(RequestId("REQ-7".to_owned())));
    }

    #[test]
    fn escalation_entry_keeps_the_reason() {
        let entry = ActivityEntry::request_escalated(
            &UserId("u-admin".to_owned()),
            &laptop_request(),
            "  board visit tomorrow ",
            Utc::now(),
        );
        assert_eq!(entry.action, "Request Escalated");
        assert_eq!(
            entry.description,
            "Escalated request #REQ-7 to MD. Reason: board visit tomorrow"
        );
    }

    #[test]
    fn user_status_entry_reports_new_state() {
        let mut user = User {
            id: UserId("u-cm".to_owned()),
            username: "cm.second".to_owned(),
            full_name: "Second Floor CM".to_owned(),
            email: "cm@example.com".to_owned(),
            role: Role::ConcernManager,
            floor: Some("2nd".to_owned()),
            department: None,
            is_active: false,
            created_at: Utc::now(),
        };
        let actor = UserId("u-admin".to_owned());

        let deactivated = ActivityEntry::user_status_changed(&actor, &user, Utc::now());
        assert_eq!(deactivated.action, "User Status Changed");
        assert_eq!(deactivated.description, "User cm.second deactivated");
        assert_eq!(deactivated.request_id, None);

        user.is_active = true;
        let activated = ActivityEntry::user_status_changed(&actor, &user, Utc::now());
        assert_eq!(activated.description, "User cm.second activated");
    }
}
