//! Authorization module - roles, permission overrides and visibility scoping
//!
//! This module implements the RBAC layer with support for:
//! - A closed set of roles, permission categories and actions
//! - Built-in per-role defaults with persisted per-role overrides
//! - Superuser bypass layered over any role
//! - Row-level visibility predicates per entity type

mod catalog;
mod evaluator;
mod principal;
mod scope;
mod store;

pub use catalog::{all_actions, all_categories, all_roles, default_actions, default_matrix, default_pairs};
pub use evaluator::{PolicyEvaluator, StorePolicyEvaluator};
pub use principal::{Principal, Tenant};
pub use scope::{authorize_object, Entity, Filter, Scope};
pub use store::{Overrides, PermissionMatrix, PermissionStore};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;

/// Role tag carried by every user record. `SuperAdmin` is never stored on a
/// user; it is what a principal with the superuser flag resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    CompanyAdmin,
    ProjectManager,
    Contractor,
    Worker,
    DocumentController,
    Consultant,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::SuperAdmin,
        Role::CompanyAdmin,
        Role::ProjectManager,
        Role::Contractor,
        Role::Worker,
        Role::DocumentController,
        Role::Consultant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::CompanyAdmin => "COMPANY_ADMIN",
            Role::ProjectManager => "PROJECT_MANAGER",
            Role::Contractor => "CONTRACTOR",
            Role::Worker => "WORKER",
            Role::DocumentController => "DOCUMENT_CONTROLLER",
            Role::Consultant => "CONSULTANT",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "Super Admin",
            Role::CompanyAdmin => "Company Admin",
            Role::ProjectManager => "Project Manager",
            Role::Contractor => "Contractor",
            Role::Worker => "Worker",
            Role::DocumentController => "Document Controller",
            Role::Consultant => "Consultant",
        }
    }

    /// Roles that may be stored on a user record.
    pub fn is_assignable(&self) -> bool {
        !matches!(self, Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| AppError::invalid_role(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PermissionCategory {
    Companies,
    Users,
    Contractors,
    Projects,
    Tasks,
    Documents,
    Reports,
    Settings,
}

impl PermissionCategory {
    pub const ALL: [PermissionCategory; 8] = [
        PermissionCategory::Companies,
        PermissionCategory::Users,
        PermissionCategory::Contractors,
        PermissionCategory::Projects,
        PermissionCategory::Tasks,
        PermissionCategory::Documents,
        PermissionCategory::Reports,
        PermissionCategory::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionCategory::Companies => "companies",
            PermissionCategory::Users => "users",
            PermissionCategory::Contractors => "contractors",
            PermissionCategory::Projects => "projects",
            PermissionCategory::Tasks => "tasks",
            PermissionCategory::Documents => "documents",
            PermissionCategory::Reports => "reports",
            PermissionCategory::Settings => "settings",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.as_str() == value)
    }
}

impl fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PermissionAction {
    Create,
    Read,
    Update,
    Delete,
    Activate,
    AssignRole,
    AssignCompany,
    Approve,
    Reject,
    ViewAll,
    Export,
    ManageRoles,
    ManagePermissions,
    SystemSettings,
    CompanySettings,
    Assign,
    Upload,
    Comment,
}

impl PermissionAction {
    pub const ALL: [PermissionAction; 18] = [
        PermissionAction::Create,
        PermissionAction::Read,
        PermissionAction::Update,
        PermissionAction::Delete,
        PermissionAction::Activate,
        PermissionAction::AssignRole,
        PermissionAction::AssignCompany,
        PermissionAction::Approve,
        PermissionAction::Reject,
        PermissionAction::ViewAll,
        PermissionAction::Export,
        PermissionAction::ManageRoles,
        PermissionAction::ManagePermissions,
        PermissionAction::SystemSettings,
        PermissionAction::CompanySettings,
        PermissionAction::Assign,
        PermissionAction::Upload,
        PermissionAction::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionAction::Create => "create",
            PermissionAction::Read => "read",
            PermissionAction::Update => "update",
            PermissionAction::Delete => "delete",
            PermissionAction::Activate => "activate",
            PermissionAction::AssignRole => "assign_role",
            PermissionAction::AssignCompany => "assign_company",
            PermissionAction::Approve => "approve",
            PermissionAction::Reject => "reject",
            PermissionAction::ViewAll => "view_all",
            PermissionAction::Export => "export",
            PermissionAction::ManageRoles => "manage_roles",
            PermissionAction::ManagePermissions => "manage_permissions",
            PermissionAction::SystemSettings => "system_settings",
            PermissionAction::CompanySettings => "company_settings",
            PermissionAction::Assign => "assign",
            PermissionAction::Upload => "upload",
            PermissionAction::Comment => "comment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == value)
    }
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_strings_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!(matches!("ADMIN".parse::<Role>(), Err(AppError::InvalidRole(_))));
        assert!(matches!("company_admin".parse::<Role>(), Err(AppError::InvalidRole(_))));
    }

    #[test]
    fn serde_names_match_wire_names() {
        assert_eq!(serde_json::to_value(Role::DocumentController).unwrap(), "DOCUMENT_CONTROLLER");
        assert_eq!(serde_json::to_value(PermissionAction::AssignRole).unwrap(), "assign_role");
        assert_eq!(serde_json::to_value(PermissionCategory::Reports).unwrap(), "reports");
        assert_eq!(PermissionAction::parse("view_all"), Some(PermissionAction::ViewAll));
        assert_eq!(PermissionCategory::parse("billing"), None);
    }

    #[test]
    fn super_admin_is_not_assignable() {
        assert!(!Role::SuperAdmin.is_assignable());
        assert!(Role::ALL.iter().filter(|role| role.is_assignable()).count() == 6);
    }
}
