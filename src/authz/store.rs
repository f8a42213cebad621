use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::catalog::{default_matrix, default_pairs};
use super::{PermissionAction, PermissionCategory, Role};
use crate::errors::{AppError, AppResult};
use crate::utils::utc_now;

/// Resolved permissions for a role: every category present, possibly empty.
pub type PermissionMatrix = BTreeMap<PermissionCategory, Vec<PermissionAction>>;

/// What the persisted table holds for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overrides {
    /// The permission table does not exist yet.
    Unprovisioned,
    /// No rows for the role; built-in defaults apply.
    Unset,
    /// At least one row exists; only `is_allowed` pairs count.
    Rows(Vec<(PermissionCategory, PermissionAction, bool)>),
}

impl Overrides {
    /// Collapse into the effective matrix, falling back to `role` defaults when
    /// nothing is stored.
    pub fn resolve(self, role: Role) -> PermissionMatrix {
        match self {
            Overrides::Unprovisioned | Overrides::Unset => default_matrix(role),
            Overrides::Rows(rows) => {
                let mut grouped: BTreeMap<PermissionCategory, BTreeSet<PermissionAction>> = PermissionCategory::ALL
                    .into_iter()
                    .map(|category| (category, BTreeSet::new()))
                    .collect();
                for (category, action, allowed) in rows {
                    if allowed {
                        grouped.entry(category).or_default().insert(action);
                    }
                }
                grouped
                    .into_iter()
                    .map(|(category, actions)| (category, actions.into_iter().collect()))
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PermissionStore {
    pool: SqlitePool,
}

impl PermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn is_provisioned(&self) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'role_permissions'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn overrides(&self, role: Role) -> AppResult<Overrides> {
        if !self.is_provisioned().await? {
            return Ok(Overrides::Unprovisioned);
        }

        let rows = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT category, action, is_allowed FROM role_permissions WHERE role = ?",
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Overrides::Unset);
        }

        let parsed = rows
            .into_iter()
            .filter_map(|(category, action, allowed)| {
                match (PermissionCategory::parse(&category), PermissionAction::parse(&action)) {
                    (Some(category), Some(action)) => Some((category, action, allowed)),
                    _ => {
                        tracing::warn!(%role, %category, %action, "ignoring unknown stored permission");
                        None
                    }
                }
            })
            .collect();

        Ok(Overrides::Rows(parsed))
    }

    /// Never fails: storage problems degrade to the built-in defaults.
    pub async fn effective_permissions(&self, role: Role) -> PermissionMatrix {
        match self.overrides(role).await {
            Ok(Overrides::Unprovisioned) => {
                tracing::warn!(%role, "role_permissions table missing, using defaults");
                default_matrix(role)
            }
            Ok(overrides) => overrides.resolve(role),
            Err(err) => {
                tracing::warn!(%role, error = %err, "failed to load role permissions, using defaults");
                default_matrix(role)
            }
        }
    }

    pub async fn is_allowed(&self, role: Role, category: PermissionCategory, action: PermissionAction) -> bool {
        self.effective_permissions(role)
            .await
            .get(&category)
            .map(|actions| actions.contains(&action))
            .unwrap_or(false)
    }

    async fn require_provisioned(&self) -> AppResult<()> {
        if self.is_provisioned().await? {
            Ok(())
        } else {
            Err(AppError::storage_unavailable("role permission storage is not provisioned"))
        }
    }

    /// Replace every stored row for `role` with exactly the valid pairs in
    /// `payload`. Unknown categories and actions are skipped.
    pub async fn set_permissions(&self, role: &str, payload: &Value) -> AppResult<PermissionMatrix> {
        let role: Role = role.parse()?;
        let granted = parse_payload(role, payload)?;
        self.require_provisioned().await?;

        // Defaults that were not granted get explicit denial rows so an empty
        // grant never resolves back to the defaults.
        let denied: Vec<_> = default_pairs(role)
            .into_iter()
            .filter(|pair| !granted.contains(pair))
            .collect();

        let now = utc_now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_permissions WHERE role = ?")
            .bind(role)
            .execute(&mut *tx)
            .await?;

        let rows = granted
            .iter()
            .map(|pair| (pair, true))
            .chain(denied.iter().map(|pair| (pair, false)));
        for ((category, action), allowed) in rows {
            sqlx::query(
                "INSERT INTO role_permissions (id, role, category, action, is_allowed, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(role)
            .bind(*category)
            .bind(*action)
            .bind(allowed)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(%role, granted = granted.len(), denied = denied.len(), "role permissions replaced");
        Ok(self.overrides(role).await?.resolve(role))
    }

    /// Re-seed `role` from the built-in defaults. Returns the number of rows
    /// written.
    pub async fn reset_to_defaults(&self, role: &str) -> AppResult<usize> {
        let role: Role = role.parse()?;
        self.require_provisioned().await?;

        let pairs = default_pairs(role);
        let now = utc_now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_permissions WHERE role = ?")
            .bind(role)
            .execute(&mut *tx)
            .await?;

        for (category, action) in &pairs {
            sqlx::query(
                "INSERT INTO role_permissions (id, role, category, action, is_allowed, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(role)
            .bind(*category)
            .bind(*action)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(%role, count = pairs.len(), "role permissions reset to defaults");
        Ok(pairs.len())
    }
}

fn parse_payload(role: Role, payload: &Value) -> AppResult<BTreeSet<(PermissionCategory, PermissionAction)>> {
    let map = payload
        .as_object()
        .ok_or_else(|| AppError::invalid_permissions_payload("permissions must be an object of category to action list"))?;

    let mut granted = BTreeSet::new();
    for (raw_category, actions) in map {
        let actions = actions.as_array().ok_or_else(|| {
            AppError::invalid_permissions_payload(format!("permissions for '{raw_category}' must be a list"))
        })?;

        let Some(category) = PermissionCategory::parse(raw_category) else {
            tracing::warn!(%role, category = %raw_category, "skipping unknown permission category");
            continue;
        };

        for raw_action in actions {
            match raw_action.as_str().and_then(PermissionAction::parse) {
                Some(action) => {
                    granted.insert((category, action));
                }
                None => {
                    tracing::warn!(%role, %category, action = %raw_action, "skipping unknown permission action");
                }
            }
        }
    }

    Ok(granted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rows_resolve_to_allowed_pairs_only() {
        let overrides = Overrides::Rows(vec![
            (PermissionCategory::Tasks, PermissionAction::Read, true),
            (PermissionCategory::Tasks, PermissionAction::Update, false),
        ]);
        let matrix = overrides.resolve(Role::Worker);
        assert_eq!(matrix.len(), PermissionCategory::ALL.len());
        assert_eq!(matrix[&PermissionCategory::Tasks], vec![PermissionAction::Read]);
        assert!(matrix[&PermissionCategory::Users].is_empty());
    }

    #[test]
    fn unset_falls_back_to_defaults() {
        assert_eq!(Overrides::Unset.resolve(Role::Consultant), default_matrix(Role::Consultant));
        assert_eq!(Overrides::Unprovisioned.resolve(Role::Worker), default_matrix(Role::Worker));
    }

    #[test]
    fn payload_skips_unknown_entries() {
        let payload = json!({
            "tasks": ["read", "fly", 7],
            "billing": ["read"],
            "documents": []
        });
        let granted = parse_payload(Role::Worker, &payload).unwrap();
        assert_eq!(
            granted.into_iter().collect::<Vec<_>>(),
            vec![(PermissionCategory::Tasks, PermissionAction::Read)]
        );
    }

    #[test]
    fn payload_must_be_a_map_of_lists() {
        assert!(matches!(
            parse_payload(Role::Worker, &json!(["tasks"])),
            Err(AppError::InvalidPermissionsPayload(_))
        ));
        assert!(matches!(
            parse_payload(Role::Worker, &json!({"tasks": "read"})),
            Err(AppError::InvalidPermissionsPayload(_))
        ));
    }
}
