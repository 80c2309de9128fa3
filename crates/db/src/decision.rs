use tracing::{info, warn};

use assetdesk_core::approvals::DecisionOutcome;
use assetdesk_core::audit::ActivityEntry;
use assetdesk_core::errors::{ApplicationError, DomainError};

use crate::repositories::activity::insert_entry;
use crate::repositories::approval::insert_record;
use crate::repositories::asset_request::{parse_status, stage_columns};
use crate::repositories::RepositoryError;
use crate::DbPool;

/// Persists a decision outcome in one transaction. The request row is only
/// updated if it still sits at the stage the decision was computed against,
/// so two approvers racing on the same stage cannot both advance it.
#[derive(Clone)]
pub struct DecisionStore {
    pool: DbPool,
}

impl DecisionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn commit(
        &self,
        outcome: &DecisionOutcome,
        activity: &ActivityEntry,
    ) -> Result<(), ApplicationError> {
        let request = &outcome.request;
        let (expected_level, expected_escalated) = stage_columns(outcome.previous_stage);
        let (new_level, new_escalated) = stage_columns(request.stage);

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let updated = sqlx::query(
            "UPDATE asset_request
             SET status = ?, approval_level = ?, escalated = ?, updated_at = ?
             WHERE id = ? AND status = 'pending' AND approval_level = ? AND escalated = ?",
        )
        .bind(request.status.as_str())
        .bind(new_level)
        .bind(new_escalated)
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(expected_level)
        .bind(expected_escalated)
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        if updated.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM asset_request WHERE id = ?")
                    .bind(&request.id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(RepositoryError::from)?;
            tx.rollback().await.map_err(RepositoryError::from)?;

            let error = match current {
                None => DomainError::NotFound { entity: "asset request", id: request.id.0.clone() },
                Some(status) => {
                    let status = parse_status(&status)?;
                    if status.is_terminal() {
                        DomainError::InvalidState { request_id: request.id.clone(), status }
                    } else {
                        DomainError::ConcurrentConflict {
                            request_id: request.id.clone(),
                            expected: outcome.previous_stage,
                        }
                    }
                }
            };

            warn!(
                event_name = "approval.decision.stale",
                request_id = %request.id,
                expected_stage = %outcome.previous_stage,
                error = %error,
                "decision lost the conditional update"
            );
            return Err(error.into());
        }

        insert_record(&mut *tx, &outcome.record).await.map_err(RepositoryError::from)?;
        insert_entry(&mut *tx, activity).await.map_err(RepositoryError::from)?;
        tx.commit().await.map_err(RepositoryError::from)?;

        info!(
            event_name = "approval.decision.committed",
            request_id = %request.id,
            approver_id = %outcome.record.approver_id,
            action = outcome.record.action.as_str(),
            from_stage = %outcome.previous_stage,
            to_stage = %request.stage,
            status = request.status.as_str(),
            "decision committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use assetdesk_core::approvals::ApprovalEngine;
    use assetdesk_core::audit::ActivityEntry;
    use assetdesk_core::domain::approval::Decision;
    use assetdesk_core::domain::request::{ApprovalStage, RequestId, RequestStatus};
    use assetdesk_core::domain::user::UserId;
    use assetdesk_core::errors::{ApplicationError, DomainError};

    use super::DecisionStore;
    use crate::fixtures::DemoSeedDataset;
    use crate::repositories::{
        ActivityLogRepository, ApprovalRepository, AssetRequestRepository,
        SqlActivityLogRepository, SqlApprovalRepository, SqlAssetRequestRepository,
        SqlUserRepository, UserRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoSeedDataset::load(&pool).await.expect("seed");
        pool
    }

    #[tokio::test]
    async fn stale_second_decision_is_rejected_without_extra_rows() {
        let pool = setup_pool().await;
        let engine = ApprovalEngine::standard();
        let store = DecisionStore::new(pool.clone());
        let users = SqlUserRepository::new(pool.clone());
        let requests = SqlAssetRequestRepository::new(pool.clone());
        let approvals = SqlApprovalRepository::new(pool.clone());
        let activity = SqlActivityLogRepository::new(pool.clone());

        let admin = users
            .find_by_id(&UserId(DemoSeedDataset::ADMIN.to_string()))
            .await
            .expect("load")
            .expect("admin seeded");
        let request_id = RequestId(DemoSeedDataset::CONCERN_MANAGER_REQUEST.to_string());
        let snapshot = requests.find_by_id(&request_id).await.expect("load").expect("seeded");

        // Both decisions are computed against the same level-1 snapshot.
        let first = engine
            .decide(&admin, &snapshot, Decision::Approve, "ok", Utc::now())
            .expect("first decision");
        let second = engine
            .decide(&admin, &snapshot, Decision::Approve, "dup", Utc::now())
            .expect("second decision");

        store
            .commit(&first, &ActivityEntry::request_approved(&admin.id, &snapshot, Utc::now()))
            .await
            .expect("first commit");
        let error = store
            .commit(&second, &ActivityEntry::request_approved(&admin.id, &snapshot, Utc::now()))
            .await
            .expect_err("stale commit");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::ConcurrentConflict { expected, .. })
                if expected == ApprovalStage::level(1)
        ));

        let stored = requests.find_by_id(&request_id).await.expect("load").expect("present");
        assert_eq!(stored.stage, ApprovalStage::level(2));
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(approvals.list_for_request(&request_id).await.expect("history").len(), 1);
        let approved_entries = activity
            .list_for_request(&request_id)
            .await
            .expect("activity")
            .into_iter()
            .filter(|entry| entry.action == "Request Approved")
            .count();
        assert_eq!(approved_entries, 1);
    }

    #[tokio::test]
    async fn commit_against_closed_request_reports_invalid_state() {
        let pool = setup_pool().await;
        let engine = ApprovalEngine::standard();
        let store = DecisionStore::new(pool.clone());
        let users = SqlUserRepository::new(pool.clone());
        let requests = SqlAssetRequestRepository::new(pool.clone());

        let scm = users
            .find_by_id(&UserId(DemoSeedDataset::ACCOUNTS_SCM.to_string()))
            .await
            .expect("load")
            .expect("scm seeded");
        let request_id = RequestId(DemoSeedDataset::ADMIN_REQUEST.to_string());
        let snapshot = requests.find_by_id(&request_id).await.expect("load").expect("seeded");

        let reject = engine
            .decide(&scm, &snapshot, Decision::Reject, "no budget", Utc::now())
            .expect("reject");
        let approve =
            engine.decide(&scm, &snapshot, Decision::Approve, "", Utc::now()).expect("approve");

        store
            .commit(&reject, &ActivityEntry::request_rejected(&scm.id, &snapshot, Utc::now()))
            .await
            .expect("reject commit");
        let error = store
            .commit(&approve, &ActivityEntry::request_approved(&scm.id, &snapshot, Utc::now()))
            .await
            .expect_err("closed");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InvalidState {
                status: RequestStatus::Rejected,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn failed_history_insert_rolls_back_the_update() {
        let pool = setup_pool().await;
        let engine = ApprovalEngine::standard();
        let store = DecisionStore::new(pool.clone());
        let users = SqlUserRepository::new(pool.clone());
        let requests = SqlAssetRequestRepository::new(pool.clone());

        let scm = users
            .find_by_id(&UserId(DemoSeedDataset::ACCOUNTS_SCM.to_string()))
            .await
            .expect("load")
            .expect("scm seeded");
        let request_id = RequestId(DemoSeedDataset::ADMIN_REQUEST.to_string());
        let snapshot = requests.find_by_id(&request_id).await.expect("load").expect("seeded");
        let outcome =
            engine.decide(&scm, &snapshot, Decision::Approve, "", Utc::now()).expect("approve");

        // Activity row pointing at an unknown user violates the foreign key.
        let bad_activity = ActivityEntry::request_approved(
            &UserId("u-missing".to_string()),
            &snapshot,
            Utc::now(),
        );
        let error = store.commit(&outcome, &bad_activity).await.expect_err("fk violation");
        assert!(matches!(error, ApplicationError::Persistence(_)));

        let stored = requests.find_by_id(&request_id).await.expect("load").expect("present");
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(stored.stage, ApprovalStage::level(1));
        let history = SqlApprovalRepository::new(pool.clone())
            .list_for_request(&request_id)
            .await
            .expect("history");
        assert!(history.is_empty());
    }
}
