use std::collections::HashSet;

use assetdesk_core::{
    ApplicationError, ApprovalStage, Decision, DomainError, RequestId, RequestStatus, Role, UserId,
};
use assetdesk_db::{connect_with_settings, migrations, ApprovalService, DemoSeedDataset, DbPool};
use serde::Deserialize;

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
    ($left:expr, $right:expr, $($arg:tt)*) => {
        if $left != $right {
            return Err(format!($($arg)*));
        }
    };
}

#[derive(Debug, Deserialize)]
struct SeedContract {
    schema_version: u32,
    users: Vec<UserContract>,
    requests: Vec<RequestContract>,
}

#[derive(Debug, Deserialize)]
struct UserContract {
    id: String,
    role: String,
    floor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestContract {
    request_id: String,
    owner_id: String,
    requester_role: String,
    floor: Option<String>,
    approvers: Vec<String>,
    refused_at_first_level: Vec<String>,
}

const CONTRACT_JSON: &str = include_str!("../../../config/fixtures/demo_seed_contract.json");

fn load_contract() -> SeedContractTestResult<SeedContract> {
    serde_json::from_str(CONTRACT_JSON).map_err(|error| format!("contract should parse: {error}"))
}

fn sql_literal(value: Option<&str>) -> String {
    value.map(|value| format!("'{value}'")).unwrap_or_else(|| "NULL".to_string())
}

async fn seeded_service() -> SeedContractTestResult<ApprovalService> {
    let pool: DbPool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect failed: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate failed: {error}"))?;
    DemoSeedDataset::load(&pool).await.map_err(|error| format!("seed failed: {error}"))?;
    Ok(ApprovalService::new(pool))
}

async fn active_user(
    service: &ApprovalService,
    id: &str,
) -> SeedContractTestResult<assetdesk_core::User> {
    service
        .active_user(&UserId(id.to_string()))
        .await
        .map_err(|error| format!("user lookup failed for {id}: {error}"))?
        .ok_or_else(|| format!("seeded user {id} should be active"))
}

#[test]
fn contract_matches_fixture_sql() -> SeedContractTestResult {
    let contract = load_contract()?;
    require_eq!(contract.schema_version, 1);

    let user_ids: HashSet<&str> = contract.users.iter().map(|user| user.id.as_str()).collect();
    require_eq!(user_ids.len(), contract.users.len(), "user ids must be unique");
    require!(user_ids.contains(DemoSeedDataset::MD), "contract must include the MD account");

    for user in &contract.users {
        let prefix = format!("('{}',", user.id);
        let row = DemoSeedDataset::SQL
            .lines()
            .find(|line| line.trim_start().starts_with(&prefix))
            .ok_or_else(|| format!("fixture SQL is missing user {}", user.id))?;
        require!(
            row.contains(&format!("'{}'", user.role)),
            "user {} should be seeded with role {}",
            user.id,
            user.role
        );
        require!(
            row.contains(&sql_literal(user.floor.as_deref())),
            "user {} should be seeded with floor {:?}",
            user.id,
            user.floor
        );
        require!(
            !matches!(Role::parse(&user.role), Role::Other(_)),
            "user {} has an unknown role {}",
            user.id,
            user.role
        );
    }

    for request in &contract.requests {
        let expected_row = format!(
            "('{}', '{}', '{}', {},",
            request.request_id,
            request.owner_id,
            request.requester_role,
            sql_literal(request.floor.as_deref())
        );
        require!(
            DemoSeedDataset::SQL.contains(&expected_row),
            "fixture SQL should contain request row starting with {expected_row}"
        );
        require!(
            DemoSeedDataset::SQL
                .contains(&format!("'Created asset request #{}", request.request_id)),
            "request {} should have a `Request Created` activity row",
            request.request_id
        );
        require!(
            user_ids.contains(request.owner_id.as_str()),
            "owner {} of {} is not a seeded user",
            request.owner_id,
            request.request_id
        );
    }

    Ok(())
}

#[test]
fn approver_chains_match_engine_depth() -> SeedContractTestResult {
    let contract = load_contract()?;
    let engine = assetdesk_core::ApprovalEngine::standard();

    for request in &contract.requests {
        let role = Role::parse(&request.requester_role);
        require_eq!(
            usize::from(engine.max_level(&role)),
            request.approvers.len(),
            "request {} should need {} approvals",
            request.request_id,
            engine.max_level(&role)
        );
        require!(
            !request.approvers.contains(&request.owner_id),
            "owner of {} must not appear in its own approver chain",
            request.request_id
        );
        for refused in &request.refused_at_first_level {
            require!(
                request.approvers.first() != Some(refused),
                "{refused} cannot be both the first approver and refused for {}",
                request.request_id
            );
        }
    }

    Ok(())
}

#[tokio::test]
async fn seeded_requests_refuse_ineligible_first_level_approvers() -> SeedContractTestResult {
    let contract = load_contract()?;
    let service = seeded_service().await?;

    for request in &contract.requests {
        let request_id = RequestId(request.request_id.clone());
        for refused in &request.refused_at_first_level {
            let actor = active_user(&service, refused).await?;
            let result =
                service.decide(&actor, &request_id, Decision::Approve, "", "seed-contract").await;
            require!(
                matches!(
                    result,
                    Err(ApplicationError::Domain(DomainError::PermissionDenied { .. }))
                ),
                "{refused} should be refused on {} but got {result:?}",
                request.request_id
            );
        }
    }

    Ok(())
}

#[tokio::test]
async fn seeded_requests_complete_along_their_chains() -> SeedContractTestResult {
    let contract = load_contract()?;
    let service = seeded_service().await?;

    for request in &contract.requests {
        let request_id = RequestId(request.request_id.clone());
        let last = request.approvers.len();

        for (index, approver) in request.approvers.iter().enumerate() {
            let actor = active_user(&service, approver).await?;
            let outcome = service
                .decide(&actor, &request_id, Decision::Approve, "contract walk", "seed-contract")
                .await
                .map_err(|error| {
                    format!("{approver} should approve {} at step {index}: {error}", request_id)
                })?;

            if index + 1 == last {
                require_eq!(
                    outcome.new_status(),
                    RequestStatus::Approved,
                    "{} should be approved after its last level",
                    request_id
                );
            } else {
                require_eq!(outcome.new_status(), RequestStatus::Pending);
                let next_level = u8::try_from(index + 2).map_err(|error| error.to_string())?;
                require_eq!(
                    outcome.request.stage,
                    ApprovalStage::level(next_level),
                    "{} should advance to level {next_level}",
                    request_id
                );
            }
        }

        let md = active_user(&service, DemoSeedDataset::MD).await?;
        let history = service
            .history(&md, &request_id)
            .await
            .map_err(|error| format!("history for {request_id} failed: {error}"))?;
        require_eq!(history.len(), last, "{} should record one approval per level", request_id);
    }

    Ok(())
}
