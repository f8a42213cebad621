//! Queries that always carry the caller's visibility predicate.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::paging::{Page, PageQuery};
use crate::authz::{Entity, Scope};
use crate::errors::{AppError, AppResult};

/// Shape of a paged listing: which table, which columns, in what order.
#[derive(Debug, Clone, Copy)]
pub struct Listing<'a> {
    pub entity: Entity,
    pub columns: &'a str,
    pub order_by: &'a str,
}

/// Page of visible rows. `conditions` appends extra ` AND ...` clauses and is
/// invoked once for the count and once for the select.
pub async fn fetch_page<T, F>(
    pool: &SqlitePool,
    scope: &Scope,
    listing: Listing<'_>,
    query: &PageQuery,
    conditions: F,
) -> AppResult<Page<T>>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    F: Fn(&mut QueryBuilder<'_, Sqlite>),
{
    let table = listing.entity.table();
    let visible = scope.filter(listing.entity);

    let mut count = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {table} WHERE "));
    visible.push_to(&mut count);
    conditions(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM {table} WHERE ", listing.columns));
    visible.push_to(&mut select);
    conditions(&mut select);
    select.push(format!(" ORDER BY {} LIMIT ", listing.order_by));
    select.push_bind(query.limit());
    select.push(" OFFSET ");
    select.push_bind(query.offset());

    let items = select.build_query_as::<T>().fetch_all(pool).await?;
    Ok(Page::new(items, total, query))
}

/// One visible row, or `NotFound` whether it is missing or merely hidden.
pub async fn fetch_visible<T>(pool: &SqlitePool, scope: &Scope, entity: Entity, columns: &str, id: Uuid) -> AppResult<T>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let table = entity.table();
    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {columns} FROM {table} WHERE {table}.id = "));
    select.push_bind(id);
    select.push(" AND ");
    scope.filter(entity).push_to(&mut select);

    select
        .build_query_as::<T>()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{} not found", entity.label())))
}

/// Unscoped lookup, for reading back a row the caller just wrote or was
/// already authorized for.
pub async fn fetch_by_id<T>(pool: &SqlitePool, entity: Entity, columns: &str, id: Uuid) -> AppResult<T>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let table = entity.table();
    sqlx::query_as::<_, T>(&format!("SELECT {columns} FROM {table} WHERE {table}.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{} not found", entity.label())))
}

/// `%term%` for a case-insensitive LIKE, with wildcards in the term escaped.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
