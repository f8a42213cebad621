use async_trait::async_trait;

use super::principal::Principal;
use super::store::PermissionStore;
use super::{PermissionAction, PermissionCategory};
use crate::errors::{AppError, AppResult};

/// Policy evaluator trait for pluggable authorization logic
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Check if the principal holds `action` within `category`
    async fn can(&self, principal: &Principal, category: PermissionCategory, action: PermissionAction) -> bool;

    /// Same as [`PolicyEvaluator::can`] but fails with `Forbidden`
    async fn require(
        &self,
        principal: &Principal,
        category: PermissionCategory,
        action: PermissionAction,
    ) -> AppResult<()> {
        if self.can(principal, category, action).await {
            Ok(())
        } else {
            Err(AppError::forbidden(format!("missing permission {category}:{action}")))
        }
    }
}

/// Evaluator backed by the persisted role permission table.
///
/// Evaluation order:
/// 1. superuser flag -> allow
/// 2. effective permissions of the stored role -> allow
/// 3. deny
#[derive(Debug, Clone)]
pub struct StorePolicyEvaluator {
    store: PermissionStore,
}

impl StorePolicyEvaluator {
    pub fn new(store: PermissionStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PolicyEvaluator for StorePolicyEvaluator {
    async fn can(&self, principal: &Principal, category: PermissionCategory, action: PermissionAction) -> bool {
        if principal.is_superuser {
            tracing::debug!(
                user_id = %principal.user_id,
                %category,
                %action,
                "superuser bypass"
            );
            return true;
        }

        let allowed = self.store.is_allowed(principal.role, category, action).await;
        tracing::debug!(
            user_id = %principal.user_id,
            role = %principal.role,
            %category,
            %action,
            allowed,
            "permission check"
        );
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Role;
    use sqlx::SqlitePool;
    use uuid::Uuid;

    fn evaluator() -> StorePolicyEvaluator {
        // Unmigrated database: the store reports itself unprovisioned.
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        StorePolicyEvaluator::new(PermissionStore::new(pool))
    }

    #[tokio::test]
    async fn test_superuser_bypasses_all() {
        let principal = Principal::new(Uuid::new_v4(), Role::Worker).superuser();
        assert!(
            evaluator()
                .can(&principal, PermissionCategory::Settings, PermissionAction::ManagePermissions)
                .await
        );
    }

    #[tokio::test]
    async fn test_unprovisioned_store_uses_defaults() {
        let evaluator = evaluator();
        let worker = Principal::new(Uuid::new_v4(), Role::Worker);

        assert!(evaluator.can(&worker, PermissionCategory::Tasks, PermissionAction::Update).await);
        assert!(!evaluator.can(&worker, PermissionCategory::Tasks, PermissionAction::Delete).await);
    }

    #[tokio::test]
    async fn test_require_maps_denial_to_forbidden() {
        let consultant = Principal::new(Uuid::new_v4(), Role::Consultant);
        let result = evaluator()
            .require(&consultant, PermissionCategory::Documents, PermissionAction::Approve)
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }
}
