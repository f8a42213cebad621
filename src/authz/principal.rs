use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::Role;
use crate::app::AppState;
use crate::errors::AppError;
use crate::jwt::AuthUser;

/// Principal represents the authenticated user with role and tenant affiliation
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Principal {
    #[sqlx(rename = "id")]
    pub user_id: Uuid,
    pub role: Role,
    pub is_superuser: bool,
    pub company_id: Option<Uuid>,
    pub contractor_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub is_active: bool,
}

/// Ownership boundary a principal is affiliated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tenant {
    Company(Uuid),
    Contractor(Uuid),
    /// Workers only ever see what is theirs.
    Individual(Uuid),
    Unaffiliated,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            is_superuser: false,
            company_id: None,
            contractor_id: None,
            department_id: None,
            is_active: true,
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn with_company(mut self, company_id: Uuid) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn with_contractor(mut self, contractor_id: Uuid) -> Self {
        self.contractor_id = Some(contractor_id);
        self
    }

    /// The role authorization decisions are made against.
    pub fn effective_role(&self) -> Role {
        if self.is_superuser {
            Role::SuperAdmin
        } else {
            self.role
        }
    }

    pub fn tenant(&self) -> Tenant {
        match (self.role, self.contractor_id, self.company_id) {
            (Role::Worker, _, _) => Tenant::Individual(self.user_id),
            (Role::CompanyAdmin | Role::ProjectManager, _, Some(company)) => Tenant::Company(company),
            (_, Some(contractor), _) => Tenant::Contractor(contractor),
            (_, None, Some(company)) => Tenant::Company(company),
            (_, None, None) => Tenant::Unaffiliated,
        }
    }

    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> Result<Option<Self>, AppError> {
        let principal = sqlx::query_as::<_, Principal>(
            "SELECT id, role, is_superuser, company_id, contractor_id, department_id, is_active FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(principal)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;

        let principal = Principal::load(&state.pool, auth.user_id)
            .await?
            .ok_or_else(|| AppError::unauthorized("account no longer exists"))?;

        if !principal.is_active {
            return Err(AppError::unauthorized("account is inactive"));
        }

        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superuser_flag_overrides_stored_role() {
        let principal = Principal::new(Uuid::new_v4(), Role::Worker).superuser();
        assert_eq!(principal.effective_role(), Role::SuperAdmin);
        assert_eq!(principal.role, Role::Worker);
    }

    #[test]
    fn tenant_follows_role_and_affiliation() {
        let company = Uuid::new_v4();
        let contractor = Uuid::new_v4();
        let user = Uuid::new_v4();

        let admin = Principal::new(user, Role::CompanyAdmin).with_company(company);
        assert_eq!(admin.tenant(), Tenant::Company(company));

        let worker = Principal::new(user, Role::Worker)
            .with_company(company)
            .with_contractor(contractor);
        assert_eq!(worker.tenant(), Tenant::Individual(user));

        let controller = Principal::new(user, Role::DocumentController)
            .with_company(company)
            .with_contractor(contractor);
        assert_eq!(controller.tenant(), Tenant::Contractor(contractor));

        assert_eq!(Principal::new(user, Role::Consultant).tenant(), Tenant::Unaffiliated);
    }
}
