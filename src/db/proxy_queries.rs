use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::proxy::{ProxyIdentity, ProxyRole};

const PROXY_COLUMNS: &str = "id, url, label, role, is_active, created_at";

fn proxy_from_row(row: &PgRow) -> Result<ProxyIdentity, sqlx::Error> {
    let role_str: String = row.try_get("role")?;

    Ok(ProxyIdentity {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        label: row.try_get("label")?,
        role: role_str.parse().unwrap_or(ProxyRole::Warmup),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

/// All proxy identities, oldest first.
pub async fn list_proxies(pool: &PgPool) -> Result<Vec<ProxyIdentity>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {PROXY_COLUMNS} FROM proxies ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(proxy_from_row).collect()
}

/// Insert a proxy identity. Returns None when the normalized URL is already
/// present (duplicates are silently skipped, not errors).
pub async fn insert_proxy(
    pool: &PgPool,
    url: &str,
    label: Option<&str>,
    role: ProxyRole,
) -> Result<Option<ProxyIdentity>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO proxies (url, label, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (url) DO NOTHING
        RETURNING {PROXY_COLUMNS}
        "#,
    ))
    .bind(url)
    .bind(label)
    .bind(role.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(proxy_from_row).transpose()
}

/// Update label/role/active flag of one proxy. Returns the updated row.
pub async fn update_proxy(
    pool: &PgPool,
    id: Uuid,
    label: Option<&str>,
    role: Option<ProxyRole>,
    is_active: Option<bool>,
) -> Result<Option<ProxyIdentity>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE proxies
        SET label = COALESCE($2, label),
            role = COALESCE($3, role),
            is_active = COALESCE($4, is_active)
        WHERE id = $1
        RETURNING {PROXY_COLUMNS}
        "#,
    ))
    .bind(id)
    .bind(label)
    .bind(role.map(|r| r.to_string()))
    .bind(is_active)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(proxy_from_row).transpose()
}

/// Flip the active flag on one proxy (used by `mark_dead` and operator toggles).
pub async fn set_active(pool: &PgPool, id: Uuid, is_active: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE proxies SET is_active = $2 WHERE id = $1")
        .bind(id)
        .bind(is_active)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Bulk activate/deactivate. Returns the number of rows changed.
pub async fn set_active_bulk(
    pool: &PgPool,
    ids: &[Uuid],
    is_active: bool,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE proxies SET is_active = $2 WHERE id = ANY($1)")
        .bind(ids)
        .bind(is_active)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Delete one proxy (explicit operator action, distinct from `mark_dead`).
pub async fn delete_proxy(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM proxies WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Bulk delete. Returns the number of rows removed.
pub async fn delete_bulk(pool: &PgPool, ids: &[Uuid]) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM proxies WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
