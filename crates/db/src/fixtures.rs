use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

struct SeedUserContract {
    id: &'static str,
    role: &'static str,
    floor: Option<&'static str>,
}

struct SeedRequestContract {
    id: &'static str,
    owner_id: &'static str,
    requester_role: &'static str,
    description: &'static str,
}

const SEED_USERS: &[SeedUserContract] = &[
    SeedUserContract { id: DemoSeedDataset::MD, role: "MD", floor: None },
    SeedUserContract { id: DemoSeedDataset::ADMIN, role: "Admin", floor: None },
    SeedUserContract { id: DemoSeedDataset::ACCOUNTS_SCM, role: "Accounts/SCM", floor: None },
    SeedUserContract {
        id: DemoSeedDataset::CONCERN_MANAGER_SECOND,
        role: "Concern Manager",
        floor: Some("2nd"),
    },
    SeedUserContract {
        id: DemoSeedDataset::CONCERN_MANAGER_THIRD,
        role: "Concern Manager",
        floor: Some("3rd"),
    },
    SeedUserContract { id: DemoSeedDataset::EMPLOYEE_SECOND, role: "User", floor: Some("2nd") },
    SeedUserContract { id: DemoSeedDataset::EMPLOYEE_THIRD, role: "User", floor: Some("3rd") },
];

const SEED_REQUESTS: &[SeedRequestContract] = &[
    SeedRequestContract {
        id: DemoSeedDataset::EMPLOYEE_REQUEST,
        owner_id: DemoSeedDataset::EMPLOYEE_SECOND,
        requester_role: "User",
        description: "Second floor employee laptop: CM -> Admin -> Accounts/SCM",
    },
    SeedRequestContract {
        id: DemoSeedDataset::EMPLOYEE_THIRD_REQUEST,
        owner_id: DemoSeedDataset::EMPLOYEE_THIRD,
        requester_role: "User",
        description: "Third floor employee tablets: only the third floor CM may start",
    },
    SeedRequestContract {
        id: DemoSeedDataset::CONCERN_MANAGER_REQUEST,
        owner_id: DemoSeedDataset::CONCERN_MANAGER_SECOND,
        requester_role: "Concern Manager",
        description: "Concern manager projector: Admin -> Accounts/SCM",
    },
    SeedRequestContract {
        id: DemoSeedDataset::ADMIN_REQUEST,
        owner_id: DemoSeedDataset::ADMIN,
        requester_role: "Admin",
        description: "Admin toner: Accounts/SCM only",
    },
];

/// Deterministic demo organisation and pending requests, one per chain.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub const MD: &'static str = "u-md";
    pub const ADMIN: &'static str = "u-admin";
    pub const ACCOUNTS_SCM: &'static str = "u-scm";
    pub const CONCERN_MANAGER_SECOND: &'static str = "u-cm-2nd";
    pub const CONCERN_MANAGER_THIRD: &'static str = "u-cm-3rd";
    pub const EMPLOYEE_SECOND: &'static str = "u-emp-2nd";
    pub const EMPLOYEE_THIRD: &'static str = "u-emp-3rd";

    pub const EMPLOYEE_REQUEST: &'static str = "REQ-DEMO-001";
    pub const EMPLOYEE_THIRD_REQUEST: &'static str = "REQ-DEMO-002";
    pub const CONCERN_MANAGER_REQUEST: &'static str = "REQ-DEMO-003";
    pub const ADMIN_REQUEST: &'static str = "REQ-DEMO-004";

    /// Rows that already exist are left untouched, so loading twice is safe.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let requests_seeded = SEED_REQUESTS
            .iter()
            .map(|request| RequestSeedInfo {
                request_id: request.id,
                owner_id: request.owner_id,
                description: request.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { users_seeded: SEED_USERS.len(), requests_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for user in SEED_USERS {
            let user_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM app_user WHERE id = ?1 AND role = ?2 AND floor IS ?3)",
            )
            .bind(user.id)
            .bind(user.role)
            .bind(user.floor)
            .fetch_one(pool)
            .await?;
            checks.push((user.id, user_ok == 1));
        }

        for request in SEED_REQUESTS {
            let request_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM asset_request
                               WHERE id = ?1 AND owner_id = ?2 AND requester_role = ?3)",
            )
            .bind(request.id)
            .bind(request.owner_id)
            .bind(request.requester_role)
            .fetch_one(pool)
            .await?;
            checks.push((request.id, request_ok == 1));

            let created_logged: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM activity_log
                               WHERE request_id = ?1 AND action = 'Request Created')",
            )
            .bind(request.id)
            .fetch_one(pool)
            .await?;
            checks.push(("request-created-activity", created_logged == 1));
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub users_seeded: usize,
    pub requests_seeded: Vec<RequestSeedInfo>,
}

#[derive(Debug)]
pub struct RequestSeedInfo {
    pub request_id: &'static str,
    pub owner_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|(_, ok)| !ok).map(|(label, _)| *label).collect()
    }
}
