pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod visibility;

pub use approvals::{
    ApprovalEngine, ApproverStep, DecisionOutcome, Eligibility, EligibilityFailure,
    DEFAULT_MAX_LEVEL,
};
pub use audit::{ActivityAction, ActivityEntry};
pub use domain::approval::{ApprovalAction, ApprovalId, ApprovalRecord, Decision};
pub use domain::request::{
    ApprovalStage, AssetRequest, NewAssetRequest, RequestId, RequestStatus, Urgency,
};
pub use domain::user::{Role, User, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use visibility::{approval_queue, RequestScope};
