//! Principal query functions.

use rolesync_types::Principal;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{classify, Result};

const COLUMNS: &str = "id, tenant_id, external_id, wallet_address, nonce, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        external_id: row.get(2)?,
        wallet: row.get(3)?,
        nonce: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
        updated_at: row.get::<_, i64>(6)? as u64,
    })
}

/// Get a principal, creating an empty row if none exists.
pub fn ensure(conn: &Connection, tenant_id: i64, external_id: &str, now: u64) -> Result<Principal> {
    conn.execute(
        "INSERT INTO principals (tenant_id, external_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(tenant_id, external_id) DO NOTHING",
        rusqlite::params![tenant_id, external_id, now as i64],
    )
    .map_err(classify(format!("principal '{external_id}'")))?;
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM principals WHERE tenant_id = ?1 AND external_id = ?2"),
        rusqlite::params![tenant_id, external_id],
        from_row,
    )
    .map_err(classify(format!("principal '{external_id}'")))
}

/// Get a principal, `None` if the user never interacted with the tenant.
pub fn get(conn: &Connection, tenant_id: i64, external_id: &str) -> Result<Option<Principal>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM principals WHERE tenant_id = ?1 AND external_id = ?2"),
            rusqlite::params![tenant_id, external_id],
            from_row,
        )
        .optional()?)
}

/// Store a linking nonce for a principal, creating the principal if needed.
pub fn set_nonce(
    conn: &Connection,
    tenant_id: i64,
    external_id: &str,
    nonce: &str,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO principals (tenant_id, external_id, nonce, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(tenant_id, external_id) DO UPDATE SET
            nonce = excluded.nonce,
            updated_at = excluded.updated_at",
        rusqlite::params![tenant_id, external_id, nonce, now as i64],
    )
    .map_err(classify(format!("principal '{external_id}'")))?;
    Ok(())
}

/// Fetch and clear the open linking nonce. Compare-and-swap on the value.
pub fn take_nonce(
    conn: &Connection,
    tenant_id: i64,
    external_id: &str,
    now: u64,
) -> Result<Option<String>> {
    let current: Option<String> = conn
        .query_row(
            "SELECT nonce FROM principals WHERE tenant_id = ?1 AND external_id = ?2",
            rusqlite::params![tenant_id, external_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    let Some(nonce) = current else {
        return Ok(None);
    };
    let changed = conn.execute(
        "UPDATE principals SET nonce = NULL, updated_at = ?1
         WHERE tenant_id = ?2 AND external_id = ?3 AND nonce = ?4",
        rusqlite::params![now as i64, tenant_id, external_id, nonce],
    )?;
    Ok((changed == 1).then_some(nonce))
}

/// Link a wallet, replacing any previous one and clearing the nonce.
pub fn link_wallet(
    conn: &Connection,
    tenant_id: i64,
    external_id: &str,
    wallet: &str,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO principals (tenant_id, external_id, wallet_address, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(tenant_id, external_id) DO UPDATE SET
            wallet_address = excluded.wallet_address,
            nonce = NULL,
            updated_at = excluded.updated_at",
        rusqlite::params![tenant_id, external_id, wallet, now as i64],
    )
    .map_err(classify(format!("principal '{external_id}'")))?;
    Ok(())
}

/// Clear the linked wallet and any open nonce.
///
/// Returns `false` if the principal had no wallet linked.
pub fn unlink(conn: &Connection, tenant_id: i64, external_id: &str, now: u64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE principals SET wallet_address = NULL, nonce = NULL, updated_at = ?1
         WHERE tenant_id = ?2 AND external_id = ?3 AND wallet_address IS NOT NULL",
        rusqlite::params![now as i64, tenant_id, external_id],
    )?;
    Ok(changed == 1)
}

/// Principals of a tenant with a wallet set (not necessarily well-formed).
pub fn list_linked(conn: &Connection, tenant_id: i64) -> Result<Vec<Principal>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM principals
         WHERE tenant_id = ?1 AND wallet_address IS NOT NULL
         ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([tenant_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Principals of a tenant with no wallet but an active subscription record.
///
/// These hold a privilege they can no longer justify (they unlinked after
/// being granted).
pub fn list_unlinked_active(conn: &Connection, tenant_id: i64) -> Result<Vec<Principal>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.tenant_id, p.external_id, p.wallet_address, p.nonce, p.created_at, p.updated_at
         FROM principals p
         JOIN subscriptions s ON s.principal_id = p.id AND s.tenant_id = p.tenant_id
         WHERE p.tenant_id = ?1 AND p.wallet_address IS NULL AND s.status = 'active'
         ORDER BY p.id",
    )?;
    let rows = stmt
        .query_map([tenant_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
