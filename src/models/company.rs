use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub const COMPANY_COLUMNS: &str =
    "companies.id, companies.name, companies.email, companies.phone_number, companies.address, companies.password_hash, companies.is_active, companies.created_at, companies.updated_at";

pub const CONTRACTOR_COLUMNS: &str =
    "contractors.id, contractors.company_id, contractors.name, contractors.email, contractors.phone_number, contractors.address, contractors.is_active, contractors.created_at, contractors.updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub address: String,
    pub is_active: bool,
    /// Whether the company-level login path is enabled.
    pub has_login: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbCompany {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub address: String,
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbCompany> for Company {
    fn from(value: DbCompany) -> Self {
        Company {
            id: value.id,
            name: value.name,
            email: value.email,
            phone_number: value.phone_number,
            address: value.address,
            is_active: value.is_active,
            has_login: value.password_hash.is_some(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompanyCreateRequest {
    #[schema(example = "Acme Construction")]
    pub name: String,
    #[schema(example = "office@acme.example")]
    pub email: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    /// Company-level login secret, stored hashed.
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CompanyUpdateRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CompanyFilter {
    pub is_active: Option<bool>,
    /// Case-insensitive match on name or email.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Contractor {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub address: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContractorCreateRequest {
    /// Defaults to the caller's company.
    pub company_id: Option<Uuid>,
    #[schema(example = "BuildCo")]
    pub name: String,
    #[schema(example = "site@buildco.example")]
    pub email: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ContractorUpdateRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ContractorFilter {
    pub company_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
}
