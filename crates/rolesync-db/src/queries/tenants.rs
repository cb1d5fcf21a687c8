//! Tenant query functions.

use rolesync_types::Tenant;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{classify, DbError, Result};

const COLUMNS: &str = "id, external_id, project_id, chain_id, privilege_id, verification_signature,
     is_verified, is_syncable, last_sync_at, nonce, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        external_id: row.get(1)?,
        project_id: row.get(2)?,
        chain_id: row.get::<_, Option<i64>>(3)?.map(|c| c as u64),
        privilege_id: row.get(4)?,
        verification_signature: row.get(5)?,
        verified: row.get(6)?,
        syncable: row.get(7)?,
        last_sync_at: row.get::<_, Option<i64>>(8)?.map(|t| t as u64),
        nonce: row.get(9)?,
        created_at: row.get::<_, i64>(10)? as u64,
        updated_at: row.get::<_, i64>(11)? as u64,
    })
}

/// Create or reconfigure a tenant.
///
/// A changed contract reference (project or chain) drops verification, the
/// stored signature and any open ownership challenge. Changing only the
/// privilege keeps them.
pub fn setup(
    conn: &Connection,
    external_id: &str,
    project_id: &str,
    chain_id: u64,
    privilege_id: &str,
    now: u64,
) -> Result<Tenant> {
    conn.execute(
        "INSERT INTO tenants
         (external_id, project_id, chain_id, privilege_id, is_verified, is_syncable, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 1, ?5, ?5)
         ON CONFLICT(external_id) DO UPDATE SET
            is_verified = CASE
                WHEN tenants.project_id IS excluded.project_id AND tenants.chain_id IS excluded.chain_id
                THEN tenants.is_verified ELSE 0 END,
            verification_signature = CASE
                WHEN tenants.project_id IS excluded.project_id AND tenants.chain_id IS excluded.chain_id
                THEN tenants.verification_signature ELSE NULL END,
            nonce = CASE
                WHEN tenants.project_id IS excluded.project_id AND tenants.chain_id IS excluded.chain_id
                THEN tenants.nonce ELSE NULL END,
            project_id = excluded.project_id,
            chain_id = excluded.chain_id,
            privilege_id = excluded.privilege_id,
            updated_at = excluded.updated_at",
        rusqlite::params![external_id, project_id, chain_id as i64, privilege_id, now as i64],
    )
    .map_err(classify(format!("tenant '{external_id}'")))?;
    get(conn, external_id)
}

/// Get a tenant by external id.
pub fn get(conn: &Connection, external_id: &str) -> Result<Tenant> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM tenants WHERE external_id = ?1"),
        [external_id],
        from_row,
    )
    .map_err(classify(format!("tenant '{external_id}'")))
}

/// Get a tenant by external id, `None` if it does not exist.
pub fn find(conn: &Connection, external_id: &str) -> Result<Option<Tenant>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM tenants WHERE external_id = ?1"),
            [external_id],
            from_row,
        )
        .optional()?)
}

/// List verified tenants, optionally only those still marked syncable.
pub fn list_verified(conn: &Connection, only_syncable: bool) -> Result<Vec<Tenant>> {
    let sql = if only_syncable {
        format!("SELECT {COLUMNS} FROM tenants WHERE is_verified = 1 AND is_syncable = 1 ORDER BY id")
    } else {
        format!("SELECT {COLUMNS} FROM tenants WHERE is_verified = 1 ORDER BY id")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Store an ownership-proof nonce, replacing any open one.
pub fn set_nonce(conn: &Connection, external_id: &str, nonce: &str, now: u64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE tenants SET nonce = ?1, updated_at = ?2 WHERE external_id = ?3",
        rusqlite::params![nonce, now as i64, external_id],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("tenant '{external_id}'")));
    }
    Ok(())
}

/// Fetch and clear the open ownership-proof nonce.
///
/// The clear is a compare-and-swap on the nonce value, so two concurrent
/// callers cannot both take the same nonce. Returns `None` if there is no
/// open challenge (or another caller took it first).
pub fn take_nonce(conn: &Connection, external_id: &str, now: u64) -> Result<Option<String>> {
    let current: Option<String> = conn
        .query_row(
            "SELECT nonce FROM tenants WHERE external_id = ?1",
            [external_id],
            |row| row.get(0),
        )
        .map_err(classify(format!("tenant '{external_id}'")))?;
    let Some(nonce) = current else {
        return Ok(None);
    };
    let changed = conn.execute(
        "UPDATE tenants SET nonce = NULL, updated_at = ?1 WHERE external_id = ?2 AND nonce = ?3",
        rusqlite::params![now as i64, external_id, nonce],
    )?;
    Ok((changed == 1).then_some(nonce))
}

/// Mark a tenant verified and record the accepted signature.
///
/// Fails with [`DbError::Constraint`] if the tenant lacks a contract or
/// privilege reference.
pub fn mark_verified(conn: &Connection, external_id: &str, signature: &str, now: u64) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE tenants SET is_verified = 1, verification_signature = ?1, updated_at = ?2
             WHERE external_id = ?3",
            rusqlite::params![signature, now as i64, external_id],
        )
        .map_err(classify(format!("tenant '{external_id}'")))?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("tenant '{external_id}'")));
    }
    Ok(())
}

/// Mark a tenant unsyncable (the actuator cannot grant its privilege).
pub fn mark_unsyncable(conn: &Connection, tenant_id: i64, now: u64) -> Result<()> {
    conn.execute(
        "UPDATE tenants SET is_syncable = 0, updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now as i64, tenant_id],
    )?;
    Ok(())
}

/// Record a completed pass: syncable again, last sync at `now`.
pub fn record_sync(conn: &Connection, tenant_id: i64, now: u64) -> Result<()> {
    conn.execute(
        "UPDATE tenants SET is_syncable = 1, last_sync_at = ?1, updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now as i64, tenant_id],
    )?;
    Ok(())
}
