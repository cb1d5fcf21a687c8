//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Tenants
-- ============================================================

CREATE TABLE IF NOT EXISTS tenants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    project_id TEXT,
    chain_id INTEGER,
    privilege_id TEXT,
    verification_signature TEXT,
    is_verified INTEGER NOT NULL DEFAULT 0,
    is_syncable INTEGER NOT NULL DEFAULT 1,
    last_sync_at INTEGER,
    nonce TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (
        is_verified = 0
        OR (
            project_id IS NOT NULL AND project_id <> ''
            AND chain_id IS NOT NULL
            AND privilege_id IS NOT NULL AND privilege_id <> ''
        )
    )
);

CREATE INDEX IF NOT EXISTS idx_tenants_verified ON tenants(is_verified, is_syncable);

-- ============================================================
-- Principals & Subscriptions
-- ============================================================

CREATE TABLE IF NOT EXISTS principals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    wallet_address TEXT,
    nonce TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (tenant_id, external_id)
);

CREATE INDEX IF NOT EXISTS idx_principals_linked
    ON principals(tenant_id) WHERE wallet_address IS NOT NULL;

CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    principal_id INTEGER NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    status TEXT NOT NULL CHECK (status IN ('active', 'expired')),
    expires_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (principal_id, tenant_id)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_tenant ON subscriptions(tenant_id, status);

-- ============================================================
-- Sync job queue
-- ============================================================

CREATE TABLE IF NOT EXISTS sync_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    dedupe_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending'
        CHECK (state IN ('pending', 'running', 'done', 'failed')),
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    not_before INTEGER NOT NULL,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- At most one open job per key.
CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_open
    ON sync_jobs(kind, dedupe_key) WHERE state IN ('pending', 'running');

CREATE INDEX IF NOT EXISTS idx_sync_jobs_ready ON sync_jobs(state, not_before);
"#;

/// v2: subscription records remember the privilege they were granted, and
/// finished jobs get an index for retention pruning.
///
/// Existing records are attributed to their tenant's current privilege.
pub const MIGRATION_V2: &str = r#"
ALTER TABLE subscriptions ADD COLUMN privilege_id TEXT;

UPDATE subscriptions
SET privilege_id = (SELECT t.privilege_id FROM tenants t WHERE t.id = subscriptions.tenant_id);

CREATE INDEX IF NOT EXISTS idx_sync_jobs_finished
    ON sync_jobs(updated_at) WHERE state IN ('done', 'failed');
"#;
