//! Subscription record query functions.

use rolesync_types::{SubscriptionRecord, SubscriptionStatus};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{classify, DbError, Result};

const COLUMNS: &str = "id, principal_id, tenant_id, status, privilege_id, expires_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<SubscriptionRecord> {
    let status: String = row.get(3)?;
    let status = status.parse::<SubscriptionStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(DbError::Serialization(e)),
        )
    })?;
    Ok(SubscriptionRecord {
        id: row.get(0)?,
        principal_id: row.get(1)?,
        tenant_id: row.get(2)?,
        status,
        privilege_id: row.get(4)?,
        expires_at: row.get::<_, i64>(5)? as u64,
        updated_at: row.get::<_, i64>(6)? as u64,
    })
}

/// Get the record for a principal in a tenant.
pub fn get(conn: &Connection, principal_id: i64, tenant_id: i64) -> Result<Option<SubscriptionRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM subscriptions WHERE principal_id = ?1 AND tenant_id = ?2"),
            rusqlite::params![principal_id, tenant_id],
            from_row,
        )
        .optional()?)
}

/// Set a record active under `privilege_id` with the observed on-chain end time.
pub fn upsert_active(
    conn: &Connection,
    principal_id: i64,
    tenant_id: i64,
    privilege_id: &str,
    expires_at: u64,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO subscriptions (principal_id, tenant_id, status, privilege_id, expires_at, updated_at)
         VALUES (?1, ?2, 'active', ?3, ?4, ?5)
         ON CONFLICT(principal_id, tenant_id) DO UPDATE SET
            status = 'active',
            privilege_id = excluded.privilege_id,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at",
        rusqlite::params![principal_id, tenant_id, privilege_id, expires_at as i64, now as i64],
    )
    .map_err(classify(format!("subscription of principal {principal_id}")))?;
    Ok(())
}

/// Mark an existing record expired. Returns the number of rows changed
/// (0 when there is no record).
pub fn mark_expired(conn: &Connection, principal_id: i64, tenant_id: i64, now: u64) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE subscriptions SET status = 'expired', updated_at = ?1
         WHERE principal_id = ?2 AND tenant_id = ?3",
        rusqlite::params![now as i64, principal_id, tenant_id],
    )?;
    Ok(changed)
}

/// All records of a tenant.
pub fn list_for_tenant(conn: &Connection, tenant_id: i64) -> Result<Vec<SubscriptionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM subscriptions WHERE tenant_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([tenant_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
