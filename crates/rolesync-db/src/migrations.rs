//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are forward-only.
//! A fresh database is created at v1 and then walks every later migration,
//! so new and upgraded databases end up with the same schema.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let mut current_version: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)?;

    if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "Database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    if current_version == 0 {
        tracing::info!("Initializing database schema v1");
        conn.execute_batch(schema::SCHEMA_V1)
            .map_err(DbError::Sqlite)?;
        conn.pragma_update(None, "user_version", 1)
            .map_err(DbError::Sqlite)?;
        current_version = 1;
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        tracing::info!("Running migration to v{version}");
        let tx = conn.unchecked_transaction()?;
        run_migration(&tx, version)?;
        tx.pragma_update(None, "user_version", version)
            .map_err(DbError::Sqlite)?;
        tx.commit()?;
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        2 => conn
            .execute_batch(schema::MIGRATION_V2)
            .map_err(DbError::Sqlite),
        _ => Err(DbError::Migration(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma");
        conn
    }

    fn version(conn: &Connection) -> u32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("version")
    }

    #[test]
    fn test_fresh_migration() {
        let conn = fresh();
        run(&conn).expect("migrate");
        assert_eq!(version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_migration() {
        let conn = fresh();
        run(&conn).expect("first run");
        run(&conn).expect("second run should be no-op");
        assert_eq!(version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_database_rejected() {
        let conn = fresh();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("set version");
        assert!(matches!(run(&conn), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_tables_created() {
        let conn = fresh();
        run(&conn).expect("migrate");

        for table in ["tenants", "principals", "subscriptions", "sync_jobs"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap_or_else(|_| panic!("table {table} check"));
            assert_eq!(count, 1, "Table '{table}' should exist");
        }
    }

    #[test]
    fn test_v1_records_attributed_to_tenant_privilege() {
        let conn = fresh();
        conn.execute_batch(schema::SCHEMA_V1).expect("v1 schema");
        conn.pragma_update(None, "user_version", 1).expect("set v1");
        conn.execute_batch(
            "INSERT INTO tenants (id, external_id, project_id, chain_id, privilege_id,
                                  is_verified, created_at, updated_at)
             VALUES (1, 'guild-1', '12', 8453, 'role-1', 1, 100, 100);
             INSERT INTO principals (id, tenant_id, external_id, wallet_address, created_at, updated_at)
             VALUES (1, 1, 'user-1', '0x0101010101010101010101010101010101010101', 100, 100);
             INSERT INTO subscriptions (principal_id, tenant_id, status, expires_at, updated_at)
             VALUES (1, 1, 'active', 5000, 100);",
        )
        .expect("seed v1 rows");

        run(&conn).expect("upgrade");
        assert_eq!(version(&conn), SCHEMA_VERSION);

        let granted: Option<String> = conn
            .query_row(
                "SELECT privilege_id FROM subscriptions WHERE principal_id = 1",
                [],
                |row| row.get(0),
            )
            .expect("record");
        assert_eq!(granted.as_deref(), Some("role-1"));

        let index: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_sync_jobs_finished'",
                [],
                |row| row.get(0),
            )
            .expect("index check");
        assert_eq!(index, 1);
    }
}
