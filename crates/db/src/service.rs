use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use assetdesk_core::approvals::{ApprovalEngine, DecisionOutcome};
use assetdesk_core::audit::ActivityEntry;
use assetdesk_core::domain::approval::{ApprovalRecord, Decision};
use assetdesk_core::domain::request::{AssetRequest, NewAssetRequest, RequestId, RequestStatus};
use assetdesk_core::domain::user::{User, UserId};
use assetdesk_core::errors::{ApplicationError, DomainError};
use assetdesk_core::visibility::{approval_queue, RequestScope};

use crate::decision::DecisionStore;
use crate::repositories::activity::insert_entry;
use crate::repositories::asset_request::insert_request;
use crate::repositories::user::toggle_active;
use crate::repositories::{
    ActivityLogRepository, ApprovalRepository, AssetRequestRepository, RequestFilter,
    SqlActivityLogRepository, SqlApprovalRepository, SqlAssetRequestRepository,
    SqlUserRepository, UserRepository, DEFAULT_LIST_LIMIT,
};
use crate::DbPool;

/// Per-call metadata that ends up in log events and activity rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallContext<'a> {
    pub correlation_id: &'a str,
    pub ip_address: Option<&'a str>,
}

impl<'a> CallContext<'a> {
    pub fn new(correlation_id: &'a str) -> Self {
        Self { correlation_id, ip_address: None }
    }

    pub fn with_ip_address(mut self, ip_address: Option<&'a str>) -> Self {
        self.ip_address = ip_address;
        self
    }

    fn stamp(&self, entry: ActivityEntry) -> ActivityEntry {
        match self.ip_address {
            Some(ip_address) => entry.with_ip_address(ip_address),
            None => entry,
        }
    }
}

impl<'a> From<&'a str> for CallContext<'a> {
    fn from(correlation_id: &'a str) -> Self {
        Self::new(correlation_id)
    }
}

/// Loads the actor and request, runs the approval engine and persists the
/// result through [`DecisionStore`].
#[derive(Clone)]
pub struct ApprovalService {
    pool: DbPool,
    engine: ApprovalEngine,
    store: DecisionStore,
}

impl ApprovalService {
    pub fn new(pool: DbPool) -> Self {
        Self::with_engine(pool, ApprovalEngine::standard())
    }

    pub fn with_engine(pool: DbPool, engine: ApprovalEngine) -> Self {
        let store = DecisionStore::new(pool.clone());
        Self { pool, engine, store }
    }

    pub fn engine(&self) -> &ApprovalEngine {
        &self.engine
    }

    /// Active user for `id`, or `None` when unknown or deactivated.
    pub async fn active_user(&self, id: &UserId) -> Result<Option<User>, ApplicationError> {
        let user = SqlUserRepository::new(self.pool.clone()).find_by_id(id).await?;
        Ok(user.filter(|user| user.is_active))
    }

    pub async fn submit_request<'c>(
        &self,
        owner: &User,
        input: NewAssetRequest,
        context: impl Into<CallContext<'c>>,
    ) -> Result<AssetRequest, ApplicationError> {
        let context = context.into();
        let now = Utc::now();
        let id = RequestId(format!("REQ-{}", Uuid::new_v4().simple()));
        let request = AssetRequest::submit(id, owner, input, now)?;
        let activity = context.stamp(ActivityEntry::request_created(&owner.id, &request, now));

        let mut tx = self.pool.begin().await.map_err(persistence)?;
        insert_request(&mut *tx, &request).await.map_err(persistence)?;
        insert_entry(&mut *tx, &activity).await.map_err(persistence)?;
        tx.commit().await.map_err(persistence)?;

        info!(
            event_name = "request.submitted",
            correlation_id = context.correlation_id,
            request_id = %request.id,
            owner_id = %owner.id,
            requester_role = %request.requester_role,
            "asset request submitted"
        );
        Ok(request)
    }

    /// Request visible to `actor`; requests outside the actor's scope are
    /// reported as missing.
    pub async fn visible_request(
        &self,
        actor: &User,
        id: &RequestId,
    ) -> Result<AssetRequest, ApplicationError> {
        let request = self.load_request(id).await?;
        if !RequestScope::for_actor(actor).includes(&request) {
            return Err(not_found(id).into());
        }
        Ok(request)
    }

    /// Requests in the actor's scope, newest first.
    pub async fn list_visible(
        &self,
        actor: &User,
        status: Option<RequestStatus>,
        limit: u32,
    ) -> Result<Vec<AssetRequest>, ApplicationError> {
        let filter = RequestFilter::new(RequestScope::for_actor(actor))
            .with_status(status)
            .with_limit(limit);
        Ok(SqlAssetRequestRepository::new(self.pool.clone()).list(&filter).await?)
    }

    /// Up to `DEFAULT_LIST_LIMIT` pending requests the actor can act on now,
    /// newest first. Pages through the actor's scope until enough actionable
    /// rows are found, so older requests are not hidden behind newer ones.
    pub async fn approval_queue(&self, actor: &User) -> Result<Vec<AssetRequest>, ApplicationError> {
        let repository = SqlAssetRequestRepository::new(self.pool.clone());
        let filter = RequestFilter::new(RequestScope::for_actor(actor))
            .with_status(Some(RequestStatus::Pending))
            .with_limit(DEFAULT_LIST_LIMIT);
        let wanted = usize::try_from(DEFAULT_LIST_LIMIT).unwrap_or(usize::MAX);

        let mut queue = Vec::new();
        let mut offset = 0u32;
        loop {
            let page = repository.list(&filter.clone().with_offset(offset)).await?;
            let exhausted = page.len() < wanted;
            queue.extend(approval_queue(&self.engine, actor, &page).into_iter().cloned());
            if exhausted || queue.len() >= wanted {
                break;
            }
            offset = offset.saturating_add(DEFAULT_LIST_LIMIT);
        }

        queue.truncate(wanted);
        Ok(queue)
    }

    pub async fn history(
        &self,
        actor: &User,
        id: &RequestId,
    ) -> Result<Vec<ApprovalRecord>, ApplicationError> {
        self.visible_request(actor, id).await?;
        Ok(SqlApprovalRepository::new(self.pool.clone()).list_for_request(id).await?)
    }

    pub async fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityEntry>, ApplicationError> {
        Ok(SqlActivityLogRepository::new(self.pool.clone()).recent(limit).await?)
    }

    pub async fn decide<'c>(
        &self,
        actor: &User,
        id: &RequestId,
        decision: Decision,
        comments: &str,
        context: impl Into<CallContext<'c>>,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let context = context.into();
        let request = self.load_request(id).await?;
        let now = Utc::now();

        let outcome = match self.engine.decide(actor, &request, decision, comments, now) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "approval.decision.refused",
                    correlation_id = context.correlation_id,
                    request_id = %id,
                    actor_id = %actor.id,
                    actor_role = %actor.role,
                    stage = %request.stage,
                    error = %error,
                    "decision refused"
                );
                return Err(error.into());
            }
        };

        let activity = context.stamp(match decision {
            Decision::Approve => ActivityEntry::request_approved(&actor.id, &request, now),
            Decision::Reject => ActivityEntry::request_rejected(&actor.id, &request, now),
        });
        self.store.commit(&outcome, &activity).await?;

        info!(
            event_name = "approval.decision.applied",
            correlation_id = context.correlation_id,
            request_id = %id,
            actor_id = %actor.id,
            action = outcome.record.action.as_str(),
            from_stage = %outcome.previous_stage,
            to_stage = %outcome.request.stage,
            advanced = outcome.advanced(),
            status = outcome.new_status().as_str(),
            "decision applied"
        );
        Ok(outcome)
    }

    pub async fn escalate<'c>(
        &self,
        actor: &User,
        id: &RequestId,
        reason: &str,
        context: impl Into<CallContext<'c>>,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let context = context.into();
        let request = self.load_request(id).await?;
        let now = Utc::now();

        let outcome = match self.engine.escalate(actor, &request, reason, now) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "approval.escalation.refused",
                    correlation_id = context.correlation_id,
                    request_id = %id,
                    actor_id = %actor.id,
                    error = %error,
                    "escalation refused"
                );
                return Err(error.into());
            }
        };
        let activity =
            context.stamp(ActivityEntry::request_escalated(&actor.id, &request, reason, now));
        self.store.commit(&outcome, &activity).await?;

        info!(
            event_name = "approval.request.escalated",
            correlation_id = context.correlation_id,
            request_id = %id,
            actor_id = %actor.id,
            from_stage = %outcome.previous_stage,
            "request escalated to MD"
        );
        Ok(outcome)
    }

    /// Activates or deactivates `id`. Only MD and Admin may do this; the
    /// status change and its activity row commit together.
    pub async fn toggle_user<'c>(
        &self,
        actor: &User,
        id: &UserId,
        context: impl Into<CallContext<'c>>,
    ) -> Result<User, ApplicationError> {
        let context = context.into();
        if !actor.role.manages_users() {
            warn!(
                event_name = "user.status.refused",
                correlation_id = context.correlation_id,
                actor_id = %actor.id,
                actor_role = %actor.role,
                target_id = %id,
                "user status change refused"
            );
            return Err(DomainError::permission_denied(format!(
                "role `{}` cannot activate or deactivate users",
                actor.role
            ))
            .into());
        }

        let mut tx = self.pool.begin().await.map_err(persistence)?;
        let Some(user) = toggle_active(&mut *tx, id).await? else {
            return Err(DomainError::NotFound { entity: "user", id: id.0.clone() }.into());
        };
        let activity =
            context.stamp(ActivityEntry::user_status_changed(&actor.id, &user, Utc::now()));
        insert_entry(&mut *tx, &activity).await.map_err(persistence)?;
        tx.commit().await.map_err(persistence)?;

        info!(
            event_name = "user.status.changed",
            correlation_id = context.correlation_id,
            actor_id = %actor.id,
            target_id = %user.id,
            is_active = user.is_active,
            "user status changed"
        );
        Ok(user)
    }

    async fn load_request(&self, id: &RequestId) -> Result<AssetRequest, ApplicationError> {
        SqlAssetRequestRepository::new(self.pool.clone())
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found(id).into())
    }
}

fn not_found(id: &RequestId) -> DomainError {
    DomainError::NotFound { entity: "asset request", id: id.0.clone() }
}

fn persistence(error: sqlx::Error) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
