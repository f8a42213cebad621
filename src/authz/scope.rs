use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{Principal, Role, Tenant};
use crate::errors::{AppError, AppResult};

/// Entity types that carry row-level visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Company,
    User,
    Contractor,
    Department,
    Project,
    Blueprint,
    Pin,
    Task,
    Document,
    DocumentVersion,
    TimeEntry,
    TaskComment,
    TaskAttachment,
}

impl Entity {
    pub fn table(self) -> &'static str {
        match self {
            Entity::Company => "companies",
            Entity::User => "users",
            Entity::Contractor => "contractors",
            Entity::Department => "departments",
            Entity::Project => "projects",
            Entity::Blueprint => "blueprints",
            Entity::Pin => "pins",
            Entity::Task => "tasks",
            Entity::Document => "documents",
            Entity::DocumentVersion => "document_versions",
            Entity::TimeEntry => "time_entries",
            Entity::TaskComment => "task_comments",
            Entity::TaskAttachment => "task_attachments",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Entity::Company => "company",
            Entity::User => "user",
            Entity::Contractor => "contractor",
            Entity::Department => "department",
            Entity::Project => "project",
            Entity::Blueprint => "blueprint",
            Entity::Pin => "pin",
            Entity::Task => "task",
            Entity::Document => "document",
            Entity::DocumentVersion => "document version",
            Entity::TimeEntry => "time entry",
            Entity::TaskComment => "comment",
            Entity::TaskAttachment => "attachment",
        }
    }
}

/// A SQL predicate over an unaliased table, with `?` placeholders matched
/// positionally by `binds`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    clause: String,
    binds: Vec<Uuid>,
}

impl Filter {
    fn new(clause: impl Into<String>, binds: Vec<Uuid>) -> Self {
        Self {
            clause: clause.into(),
            binds,
        }
    }

    pub fn all() -> Self {
        Self::new("1 = 1", Vec::new())
    }

    pub fn none() -> Self {
        Self::new("1 = 0", Vec::new())
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn binds(&self) -> &[Uuid] {
        &self.binds
    }

    fn eq(column: &str, value: Uuid) -> Self {
        Self::new(format!("{column} = ?"), vec![value])
    }

    /// `column IN (SELECT parent.id FROM parent WHERE <filter>)`
    fn nested(column: &str, parent: Entity, filter: Filter) -> Self {
        let table = parent.table();
        Self::new(
            format!("{column} IN (SELECT {table}.id FROM {table} WHERE {})", filter.clause),
            filter.binds,
        )
    }

    fn or(self, other: Filter) -> Self {
        let mut binds = self.binds;
        binds.extend(other.binds);
        Self::new(format!("(({}) OR ({}))", self.clause, other.clause), binds)
    }

    fn and_clause(self, extra: &str) -> Self {
        Self::new(format!("({}) AND {extra}", self.clause), self.binds)
    }

    /// Append the predicate, parenthesized, to a query under construction.
    pub fn push_to(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        let mut binds = self.binds.iter().copied();
        let mut parts = self.clause.split('?');

        builder.push("(");
        if let Some(first) = parts.next() {
            builder.push(first);
        }
        for part in parts {
            if let Some(bind) = binds.next() {
                builder.push_bind(bind);
            }
            builder.push(part);
        }
        builder.push(")");
    }
}

/// Visibility class of a principal, resolved once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Unrestricted,
    Company(Uuid),
    Contractor { contractor: Uuid, user: Uuid },
    Worker(Uuid),
    Consultant(Uuid),
    /// Controller on the company side reviews contractor uploads.
    CompanyController { company: Uuid, user: Uuid },
    /// Controller on the contractor side reviews company uploads.
    ContractorController { contractor: Uuid, user: Uuid },
    Empty,
}

impl Scope {
    pub fn for_principal(principal: &Principal) -> Self {
        if principal.is_superuser {
            return Scope::Unrestricted;
        }

        let user = principal.user_id;
        match principal.role {
            Role::CompanyAdmin | Role::ProjectManager => principal.company_id.map(Scope::Company).unwrap_or(Scope::Empty),
            Role::Contractor => principal
                .contractor_id
                .map(|contractor| Scope::Contractor { contractor, user })
                .unwrap_or(Scope::Empty),
            Role::Worker => Scope::Worker(user),
            Role::Consultant => Scope::Consultant(user),
            Role::DocumentController => match principal.tenant() {
                Tenant::Contractor(contractor) => Scope::ContractorController { contractor, user },
                Tenant::Company(company) => Scope::CompanyController { company, user },
                Tenant::Individual(_) | Tenant::Unaffiliated => Scope::Empty,
            },
            Role::SuperAdmin => Scope::Empty,
        }
    }

    /// Projects a document controller's tenant covers.
    fn controller_projects(&self) -> Filter {
        match *self {
            Scope::CompanyController { company, .. } => Filter::eq("projects.company_id", company),
            Scope::ContractorController { contractor, .. } => Filter::eq("projects.contractor_id", contractor),
            _ => Filter::none(),
        }
    }

    fn in_projects(entity: Entity, projects: Filter) -> Filter {
        Filter::nested(&format!("{}.project_id", entity.table()), Entity::Project, projects)
    }

    pub fn filter(&self, entity: Entity) -> Filter {
        use Entity as E;

        match (*self, entity) {
            (Scope::Unrestricted, _) => Filter::all(),
            (Scope::Empty, _) => Filter::none(),

            (_, E::Pin) => Filter::nested("pins.blueprint_id", E::Blueprint, self.filter(E::Blueprint)),
            (_, E::DocumentVersion) => {
                Filter::nested("document_versions.document_id", E::Document, self.filter(E::Document))
            }
            (_, E::TimeEntry | E::TaskComment | E::TaskAttachment) => Filter::nested(
                &format!("{}.task_id", entity.table()),
                E::Task,
                self.filter(E::Task),
            ),

            (Scope::Company(company), E::Company) => Filter::eq("companies.id", company),
            (Scope::Company(company), E::User) => Filter::eq("users.company_id", company),
            (Scope::Company(company), E::Contractor) => Filter::eq("contractors.company_id", company),
            (Scope::Company(company), E::Department) => Filter::nested(
                "departments.contractor_id",
                E::Contractor,
                Filter::eq("contractors.company_id", company),
            ),
            (Scope::Company(company), E::Project) => Filter::eq("projects.company_id", company),
            (Scope::Company(_), E::Blueprint | E::Task | E::Document) => {
                Self::in_projects(entity, self.filter(E::Project))
            }

            (Scope::Contractor { contractor, .. }, E::Company) => Filter::new(
                "companies.id IN (SELECT contractors.company_id FROM contractors WHERE contractors.id = ?)",
                vec![contractor],
            ),
            (Scope::Contractor { contractor, user }, E::User) => {
                Filter::eq("users.contractor_id", contractor).or(Filter::eq("users.id", user))
            }
            (Scope::Contractor { contractor, .. }, E::Contractor) => Filter::eq("contractors.id", contractor),
            (Scope::Contractor { contractor, .. }, E::Department) => {
                Filter::eq("departments.contractor_id", contractor)
            }
            (Scope::Contractor { contractor, .. }, E::Project) => Filter::eq("projects.contractor_id", contractor),
            (Scope::Contractor { .. }, E::Blueprint | E::Task) => Self::in_projects(entity, self.filter(E::Project)),
            (Scope::Contractor { contractor, .. }, E::Document) => Filter::eq("documents.contractor_id", contractor)
                .or(Self::in_projects(entity, self.filter(E::Project))),

            (Scope::Worker(user), E::User) => Filter::eq("users.id", user),
            (Scope::Worker(user), E::Task) => Filter::eq("tasks.assigned_to", user),
            (Scope::Worker(user), E::Project) => Filter::new(
                "projects.id IN (SELECT tasks.project_id FROM tasks WHERE tasks.assigned_to = ?)",
                vec![user],
            ),
            (Scope::Worker(_), E::Blueprint) => Self::in_projects(entity, self.filter(E::Project)),
            (Scope::Worker(user), E::Document) => Filter::eq("documents.uploaded_by", user)
                .or(Self::in_projects(entity, self.filter(E::Project))),
            (Scope::Worker(_), E::Company | E::Contractor | E::Department) => Filter::none(),

            (Scope::Consultant(user), E::User) => Filter::eq("users.id", user),
            (Scope::Consultant(user), E::Project) => Filter::eq("projects.consultant_id", user),
            (Scope::Consultant(_), E::Blueprint) => Self::in_projects(entity, self.filter(E::Project)),
            (Scope::Consultant(_), _) => Filter::none(),

            (Scope::CompanyController { user, .. } | Scope::ContractorController { user, .. }, E::User) => {
                Filter::eq("users.id", user)
            }
            (Scope::CompanyController { .. }, E::Document) => {
                Self::in_projects(entity, self.controller_projects()).and_clause("documents.side = 'CONTRACTOR'")
            }
            (Scope::ContractorController { .. }, E::Document) => {
                Self::in_projects(entity, self.controller_projects()).and_clause("documents.side = 'COMPANY'")
            }
            (Scope::CompanyController { .. } | Scope::ContractorController { .. }, E::Blueprint) => {
                Self::in_projects(entity, self.controller_projects())
            }
            (Scope::CompanyController { .. } | Scope::ContractorController { .. }, _) => Filter::none(),
        }
    }

    pub async fn is_visible(&self, pool: &SqlitePool, entity: Entity, id: Uuid) -> AppResult<bool> {
        let table = entity.table();
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {table} WHERE {table}.id = "));
        builder.push_bind(id);
        builder.push(" AND ");
        self.filter(entity).push_to(&mut builder);

        let count: i64 = builder.build_query_scalar().fetch_one(pool).await?;
        Ok(count > 0)
    }

    /// NotFound unless the row exists and is visible.
    pub async fn ensure_visible(&self, pool: &SqlitePool, entity: Entity, id: Uuid) -> AppResult<()> {
        if self.is_visible(pool, entity, id).await? {
            Ok(())
        } else {
            Err(AppError::not_found(format!("{} not found", entity.label())))
        }
    }
}

async fn exists(pool: &SqlitePool, entity: Entity, id: Uuid) -> AppResult<bool> {
    let table = entity.table();
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Object-level gate for mutations. Superusers pass; otherwise the row must be
/// visible or owned through `owner_column`. Missing rows are `NotFound`, rows
/// that exist but fail both checks are `Forbidden`.
pub async fn authorize_object(
    pool: &SqlitePool,
    principal: &Principal,
    entity: Entity,
    id: Uuid,
    owner_column: Option<&str>,
) -> AppResult<()> {
    if principal.is_superuser {
        return exists(pool, entity, id)
            .await?
            .then_some(())
            .ok_or_else(|| AppError::not_found(format!("{} not found", entity.label())));
    }

    let scope = Scope::for_principal(principal);
    if scope.is_visible(pool, entity, id).await? {
        return Ok(());
    }

    if !exists(pool, entity, id).await? {
        return Err(AppError::not_found(format!("{} not found", entity.label())));
    }

    if entity == Entity::User && id == principal.user_id {
        return Ok(());
    }

    if let Some(column) = owner_column {
        let table = entity.table();
        let owner: Option<Uuid> = sqlx::query_scalar(&format!("SELECT {column} FROM {table} WHERE id = ?"))
            .bind(id)
            .fetch_one(pool)
            .await?;
        if owner == Some(principal.user_id) {
            return Ok(());
        }
    }

    tracing::debug!(
        user_id = %principal.user_id,
        entity = entity.label(),
        %id,
        "object outside visibility"
    );
    Err(AppError::forbidden(format!("not allowed to modify this {}", entity.label())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders(filter: &Filter) -> usize {
        filter.clause().matches('?').count()
    }

    #[test]
    fn every_filter_binds_each_placeholder() {
        let user = Uuid::new_v4();
        let scopes = [
            Scope::Unrestricted,
            Scope::Company(Uuid::new_v4()),
            Scope::Contractor { contractor: Uuid::new_v4(), user },
            Scope::Worker(user),
            Scope::Consultant(user),
            Scope::CompanyController { company: Uuid::new_v4(), user },
            Scope::ContractorController { contractor: Uuid::new_v4(), user },
            Scope::Empty,
        ];
        let entities = [
            Entity::Company,
            Entity::User,
            Entity::Contractor,
            Entity::Department,
            Entity::Project,
            Entity::Blueprint,
            Entity::Pin,
            Entity::Task,
            Entity::Document,
            Entity::DocumentVersion,
            Entity::TimeEntry,
            Entity::TaskComment,
            Entity::TaskAttachment,
        ];

        for scope in scopes {
            for entity in entities {
                let filter = scope.filter(entity);
                assert_eq!(placeholders(&filter), filter.binds().len(), "{scope:?} {entity:?}");
            }
        }
    }

    #[test]
    fn scope_resolution_by_role() {
        let user = Uuid::new_v4();
        let company = Uuid::new_v4();
        let contractor = Uuid::new_v4();

        let admin = Principal::new(user, Role::CompanyAdmin).with_company(company);
        assert_eq!(Scope::for_principal(&admin), Scope::Company(company));
        assert_eq!(Scope::for_principal(&admin.clone().superuser()), Scope::Unrestricted);

        let orphan_admin = Principal::new(user, Role::ProjectManager);
        assert_eq!(Scope::for_principal(&orphan_admin), Scope::Empty);

        let controller = Principal::new(user, Role::DocumentController).with_company(company);
        assert_eq!(Scope::for_principal(&controller), Scope::CompanyController { company, user });

        let controller = controller.with_contractor(contractor);
        assert_eq!(Scope::for_principal(&controller), Scope::ContractorController { contractor, user });
    }

    #[test]
    fn worker_sees_no_tenant_records() {
        let worker = Scope::Worker(Uuid::new_v4());
        assert_eq!(worker.filter(Entity::Company), Filter::none());
        assert_eq!(worker.filter(Entity::Contractor), Filter::none());
        assert_eq!(worker.filter(Entity::Department), Filter::none());
        assert_eq!(worker.filter(Entity::Task).clause(), "tasks.assigned_to = ?");
    }

    #[test]
    fn controllers_only_see_the_opposite_side() {
        let user = Uuid::new_v4();
        let company_side = Scope::CompanyController { company: Uuid::new_v4(), user };
        assert!(company_side.filter(Entity::Document).clause().contains("'CONTRACTOR'"));
        assert_eq!(company_side.filter(Entity::Task), Filter::none());

        let contractor_side = Scope::ContractorController { contractor: Uuid::new_v4(), user };
        let clause = contractor_side.filter(Entity::Document);
        assert!(clause.clause().contains("'COMPANY'"));
        assert!(clause.clause().contains("projects.contractor_id = ?"));
    }

    #[test]
    fn task_activity_follows_task_visibility() {
        let worker = Scope::Worker(Uuid::new_v4());
        let entries = worker.filter(Entity::TimeEntry);
        assert_eq!(
            entries.clause(),
            "time_entries.task_id IN (SELECT tasks.id FROM tasks WHERE tasks.assigned_to = ?)"
        );
        let comments = Scope::Consultant(Uuid::new_v4()).filter(Entity::TaskComment);
        assert_eq!(comments.clause(), "task_comments.task_id IN (SELECT tasks.id FROM tasks WHERE 1 = 0)");
    }

    #[test]
    fn push_to_inlines_binds_in_order() {
        let filter = Filter::eq("users.contractor_id", Uuid::new_v4()).or(Filter::eq("users.id", Uuid::new_v4()));
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM users WHERE ");
        filter.push_to(&mut builder);
        assert_eq!(
            builder.sql(),
            "SELECT id FROM users WHERE (((users.contractor_id = ?) OR (users.id = ?)))"
        );
    }
}
