use std::collections::HashMap;

use tokio::sync::RwLock;

use assetdesk_core::audit::ActivityEntry;
use assetdesk_core::domain::approval::ApprovalRecord;
use assetdesk_core::domain::request::{AssetRequest, RequestId};
use assetdesk_core::domain::user::{User, UserId};

use super::{
    ActivityLogRepository, ApprovalRepository, AssetRequestRepository, RepositoryError,
    RequestFilter, UserRepository,
};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        let username = username.trim();
        Ok(users.values().find(|user| user.username.eq_ignore_ascii_case(username)).cloned())
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut listed: Vec<User> = users.values().cloned().collect();
        listed.sort_by(|left, right| left.username.cmp(&right.username));
        Ok(listed)
    }
}

#[derive(Default)]
pub struct InMemoryAssetRequestRepository {
    requests: RwLock<HashMap<String, AssetRequest>>,
}

#[async_trait::async_trait]
impl AssetRequestRepository for InMemoryAssetRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<AssetRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn insert(&self, request: AssetRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(RepositoryError::Decode(format!(
                "asset request `{}` already exists",
                request.id
            )));
        }
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<AssetRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut listed: Vec<AssetRequest> =
            requests.values().filter(|request| filter.matches(request)).cloned().collect();
        listed.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        let offset = usize::try_from(filter.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.limit).unwrap_or(usize::MAX);
        Ok(listed.into_iter().skip(offset).take(limit).collect())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    records: RwLock<Vec<ApprovalRecord>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn append(&self, record: ApprovalRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut history: Vec<ApprovalRecord> =
            records.iter().filter(|record| &record.request_id == request_id).cloned().collect();
        history.sort_by_key(|record| record.decided_at);
        Ok(history)
    }
}

#[derive(Default)]
pub struct InMemoryActivityLogRepository {
    entries: RwLock<Vec<ActivityEntry>>,
}

#[async_trait::async_trait]
impl ActivityLogRepository for InMemoryActivityLogRepository {
    async fn append(&self, entry: ActivityEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<ActivityEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut recent: Vec<ActivityEntry> = entries.iter().rev().cloned().collect();
        recent.sort_by(|left, right| right.occurred_at.cmp(&left.occurred_at));
        recent.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(recent)
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ActivityEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|entry| entry.request_id.as_ref() == Some(request_id))
            .cloned()
            .collect())
    }
}
