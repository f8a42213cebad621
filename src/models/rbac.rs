use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::authz::PermissionMatrix;

/// A closed-set value with its human label.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Choice {
    pub value: &'static str,
    pub label: String,
}

impl Choice {
    /// Label derived from a snake_case value, e.g. `assign_role` -> `Assign Role`.
    pub fn humanized(value: &'static str) -> Self {
        let label = value
            .split('_')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self { value, label }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionsOverview {
    pub roles: Vec<Choice>,
    /// Effective permissions keyed by role, then category.
    #[schema(value_type = Object)]
    pub permissions: BTreeMap<&'static str, PermissionMatrix>,
    pub categories: Vec<Choice>,
    pub actions: Vec<Choice>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePermissionsRequest {
    /// `{ "<category>": ["<action>", ...] }`
    #[serde(default)]
    #[schema(value_type = Object, example = json!({"tasks": ["read", "update"]}))]
    pub permissions: Option<Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RolePermissionsResponse {
    pub role: &'static str,
    #[schema(value_type = Object)]
    pub permissions: PermissionMatrix,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResetPermissionsResponse {
    pub role: &'static str,
    pub created: usize,
    #[schema(value_type = Object)]
    pub permissions: PermissionMatrix,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanizes_snake_case() {
        assert_eq!(Choice::humanized("assign_role").label, "Assign Role");
        assert_eq!(Choice::humanized("read").label, "Read");
    }
}
