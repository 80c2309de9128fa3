use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use assetdesk_core::audit::ActivityEntry;
use assetdesk_core::domain::approval::ApprovalRecord;
use assetdesk_core::domain::request::{AssetRequest, RequestId, RequestStatus};
use assetdesk_core::domain::user::{User, UserId};
use assetdesk_core::errors::ApplicationError;
use assetdesk_core::visibility::RequestScope;

pub mod activity;
pub mod approval;
pub mod asset_request;
pub mod memory;
pub mod user;

pub use activity::SqlActivityLogRepository;
pub use approval::SqlApprovalRepository;
pub use asset_request::SqlAssetRequestRepository;
pub use memory::{
    InMemoryActivityLogRepository, InMemoryApprovalRepository, InMemoryAssetRequestRepository,
    InMemoryUserRepository,
};
pub use user::SqlUserRepository;

pub const DEFAULT_LIST_LIMIT: u32 = 200;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

/// Which requests a listing should return; newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFilter {
    pub scope: RequestScope,
    pub status: Option<RequestStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl RequestFilter {
    pub fn new(scope: RequestScope) -> Self {
        Self { scope, status: None, limit: DEFAULT_LIST_LIMIT, offset: 0 }
    }

    pub fn with_status(mut self, status: Option<RequestStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, request: &AssetRequest) -> bool {
        self.scope.includes(request) && self.status.map_or(true, |status| request.status == status)
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    async fn save(&self, user: User) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait AssetRequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<AssetRequest>, RepositoryError>;
    async fn insert(&self, request: AssetRequest) -> Result<(), RepositoryError>;
    async fn list(&self, filter: &RequestFilter) -> Result<Vec<AssetRequest>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn append(&self, record: ApprovalRecord) -> Result<(), RepositoryError>;
    /// Oldest first.
    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError>;
}

#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    async fn append(&self, entry: ActivityEntry) -> Result<(), RepositoryError>;
    /// Newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<ActivityEntry>, RepositoryError>;
    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ActivityEntry>, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_u8(column: &str, value: i64) -> Result<u8, RepositoryError> {
    u8::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `{column}` (expected 0..=255): {value}"))
    })
}
