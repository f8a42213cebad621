use std::collections::BTreeSet;

use super::{PermissionAction, PermissionCategory, Role};
use super::store::PermissionMatrix;

use PermissionAction as A;
use PermissionCategory as C;

type Grants = &'static [(PermissionCategory, &'static [PermissionAction])];

const COMPANY_ADMIN: Grants = &[
    (C::Companies, &[A::Read, A::Update]),
    (C::Users, &[A::Create, A::Read, A::Update, A::Delete, A::Activate, A::AssignRole]),
    (C::Contractors, &[A::Create, A::Read, A::Update, A::Delete, A::Activate]),
    (
        C::Projects,
        &[A::Create, A::Read, A::Update, A::Delete, A::Assign, A::Approve, A::Reject, A::Upload],
    ),
    (C::Tasks, &[A::Create, A::Read, A::Update, A::Delete, A::Assign, A::Comment]),
    (C::Documents, &[A::Create, A::Read, A::Update, A::Delete, A::Upload, A::Comment]),
    (C::Reports, &[A::Read, A::Export]),
    (C::Settings, &[A::CompanySettings]),
];

const PROJECT_MANAGER: Grants = &[
    (C::Companies, &[A::Read]),
    (C::Users, &[A::Read]),
    (C::Contractors, &[A::Read]),
    (C::Projects, &[A::Read, A::Update, A::Assign, A::Upload]),
    (C::Tasks, &[A::Create, A::Read, A::Update, A::Delete, A::Assign, A::Comment]),
    (C::Documents, &[A::Read, A::Upload, A::Comment]),
    (C::Reports, &[A::Read, A::Export]),
];

const CONTRACTOR: Grants = &[
    (C::Companies, &[A::Read]),
    (C::Users, &[A::Read, A::Update]),
    (C::Contractors, &[A::Read, A::Update]),
    (C::Projects, &[A::Read]),
    (C::Tasks, &[A::Create, A::Read, A::Update, A::Delete, A::Assign, A::Comment]),
    (C::Documents, &[A::Create, A::Read, A::Upload, A::Comment]),
    (C::Reports, &[A::Read]),
];

const WORKER: Grants = &[
    (C::Users, &[A::Read, A::Update]),
    (C::Projects, &[A::Read]),
    (C::Tasks, &[A::Read, A::Update, A::Comment]),
    (C::Documents, &[A::Read, A::Comment]),
];

const DOCUMENT_CONTROLLER: Grants = &[
    (C::Users, &[A::Read]),
    (C::Projects, &[A::Read]),
    (C::Documents, &[A::Read, A::Approve, A::Reject, A::Comment]),
];

const CONSULTANT: Grants = &[
    (C::Users, &[A::Read]),
    (C::Projects, &[A::Read, A::Approve, A::Reject, A::Comment]),
    (C::Documents, &[A::Read, A::Comment]),
];

/// Grants only the superuser carries on top of every other role's defaults.
const SUPER_ADMIN_EXTRA: Grants = &[
    (C::Companies, &[A::Create, A::Delete, A::Activate]),
    (C::Users, &[A::AssignCompany]),
    (C::Settings, &[A::SystemSettings, A::ManageRoles, A::ManagePermissions]),
];

fn grants(role: Role) -> Grants {
    match role {
        Role::SuperAdmin => SUPER_ADMIN_EXTRA,
        Role::CompanyAdmin => COMPANY_ADMIN,
        Role::ProjectManager => PROJECT_MANAGER,
        Role::Contractor => CONTRACTOR,
        Role::Worker => WORKER,
        Role::DocumentController => DOCUMENT_CONTROLLER,
        Role::Consultant => CONSULTANT,
    }
}

fn listed(role: Role, category: PermissionCategory) -> impl Iterator<Item = PermissionAction> {
    grants(role)
        .iter()
        .filter(move |(granted, _)| *granted == category)
        .flat_map(|(_, actions)| actions.iter().copied())
}

/// Built-in actions for `role` within `category`, in declaration order.
///
/// The super admin entry is synthesized: every other role's grants, its own
/// extras, and `view_all` in every category.
pub fn default_actions(role: Role, category: PermissionCategory) -> BTreeSet<PermissionAction> {
    match role {
        Role::SuperAdmin => {
            let mut actions: BTreeSet<_> = Role::ALL
                .into_iter()
                .flat_map(|other| listed(other, category))
                .collect();
            actions.insert(PermissionAction::ViewAll);
            actions
        }
        _ => listed(role, category).collect(),
    }
}

/// Full default matrix for `role`, one entry per category.
pub fn default_matrix(role: Role) -> PermissionMatrix {
    PermissionCategory::ALL
        .into_iter()
        .map(|category| (category, default_actions(role, category).into_iter().collect()))
        .collect()
}

/// Flattened `(category, action)` pairs used to seed a role on reset.
pub fn default_pairs(role: Role) -> Vec<(PermissionCategory, PermissionAction)> {
    PermissionCategory::ALL
        .into_iter()
        .flat_map(|category| {
            default_actions(role, category)
                .into_iter()
                .map(move |action| (category, action))
        })
        .collect()
}

pub fn all_roles() -> &'static [Role] {
    &Role::ALL
}

pub fn all_categories() -> &'static [PermissionCategory] {
    &PermissionCategory::ALL
}

pub fn all_actions() -> &'static [PermissionAction] {
    &PermissionAction::ALL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults() {
        let tasks = default_actions(Role::Worker, PermissionCategory::Tasks);
        assert_eq!(
            tasks.into_iter().collect::<Vec<_>>(),
            vec![PermissionAction::Read, PermissionAction::Update, PermissionAction::Comment]
        );
        assert!(default_actions(Role::Worker, PermissionCategory::Settings).is_empty());
    }

    #[test]
    fn super_admin_is_a_superset_of_every_role() {
        for role in Role::ALL {
            for category in PermissionCategory::ALL {
                let own = default_actions(role, category);
                let sup = default_actions(Role::SuperAdmin, category);
                assert!(own.is_subset(&sup), "{role} {category} not covered");
            }
        }
        for category in PermissionCategory::ALL {
            assert!(default_actions(Role::SuperAdmin, category).contains(&PermissionAction::ViewAll));
        }
        assert!(default_actions(Role::SuperAdmin, PermissionCategory::Settings)
            .contains(&PermissionAction::ManagePermissions));
    }

    #[test]
    fn matrix_lists_every_category() {
        let matrix = default_matrix(Role::DocumentController);
        assert_eq!(matrix.len(), PermissionCategory::ALL.len());
        assert!(matrix[&PermissionCategory::Companies].is_empty());
        assert!(matrix[&PermissionCategory::Documents].contains(&PermissionAction::Approve));
    }

    #[test]
    fn pairs_match_matrix() {
        for role in Role::ALL {
            let from_matrix: usize = default_matrix(role).values().map(Vec::len).sum();
            assert_eq!(default_pairs(role).len(), from_matrix);
        }
    }
}
