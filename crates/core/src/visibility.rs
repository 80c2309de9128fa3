use serde::{Deserialize, Serialize};

use crate::approvals::ApprovalEngine;
use crate::domain::request::AssetRequest;
use crate::domain::user::{Role, User, UserId};

/// Slice of the request board an actor is allowed to see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RequestScope {
    All,
    Floor(String),
    Own(UserId),
}

impl RequestScope {
    pub fn for_actor(actor: &User) -> Self {
        if actor.role.sees_all_requests() {
            return Self::All;
        }

        match (&actor.role, actor.floor.as_deref().map(str::trim)) {
            (Role::ConcernManager, Some(floor)) if !floor.is_empty() => {
                Self::Floor(floor.to_string())
            }
            _ => Self::Own(actor.id.clone()),
        }
    }

    pub fn includes(&self, request: &AssetRequest) -> bool {
        match self {
            Self::All => true,
            Self::Floor(floor) => request
                .floor
                .as_deref()
                .is_some_and(|request_floor| request_floor.trim().eq_ignore_ascii_case(floor)),
            Self::Own(user_id) => request.is_owned_by(user_id),
        }
    }
}

/// Requests in the actor's scope that the actor can decide right now.
pub fn approval_queue<'a>(
    engine: &ApprovalEngine,
    actor: &User,
    requests: impl IntoIterator<Item = &'a AssetRequest>,
) -> Vec<&'a AssetRequest> {
    let scope = RequestScope::for_actor(actor);
    requests
        .into_iter()
        .filter(|request| scope.includes(request) && engine.can_approve(actor, request))
        .collect()
}
