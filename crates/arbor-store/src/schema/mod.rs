//! Schema management and migrations

use crate::error::{RepositoryError, RepositoryResult};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Apply all pending migrations
pub fn apply_migrations(conn: &Connection) -> RepositoryResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version = get_current_version(conn)?;
    debug!(current_version, target_version = SCHEMA_VERSION, "Checking migrations");

    if current_version < SCHEMA_VERSION {
        info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Applying schema migrations"
        );
        apply_migration_v1(conn)?;
    }

    Ok(())
}

fn get_current_version(conn: &Connection) -> RepositoryResult<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

fn record_migration(conn: &Connection, version: i32) -> RepositoryResult<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version) VALUES (?)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: item tree, properties, access control, locks, blobs, journal
fn apply_migration_v1(conn: &Connection) -> RepositoryResult<()> {
    debug!("Applying migration v1: repository schema");

    conn.execute_batch(SCHEMA_V1)
        .map_err(|e| RepositoryError::Schema(format!("Failed to apply v1 schema: {}", e)))?;

    record_migration(conn, 1)?;
    info!("Migration v1 applied successfully");
    Ok(())
}

const SCHEMA_V1: &str = r#"
-- ============================================================================
-- TABLE: items
-- ============================================================================
-- One row per node. The root has no parent.

CREATE TABLE IF NOT EXISTS items (
    item_id TEXT PRIMARY KEY NOT NULL,
    item_name TEXT NOT NULL,
    item_path TEXT NOT NULL,
    parent_item_id TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_items_path ON items(item_path, is_deleted);
CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent_item_id, item_name);

-- ============================================================================
-- TABLE: properties
-- ============================================================================
-- Row id is "<owner id>/<name>". property_value is a JSON array of tokens.

CREATE TABLE IF NOT EXISTS properties (
    item_id TEXT PRIMARY KEY NOT NULL,
    parent_item_id TEXT NOT NULL,
    item_name TEXT NOT NULL,
    property_type TEXT NOT NULL,
    property_value TEXT NOT NULL,
    is_multiple INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_properties_parent ON properties(parent_item_id, item_name);
CREATE INDEX IF NOT EXISTS idx_properties_type ON properties(property_type);

-- ============================================================================
-- TABLE: aces
-- ============================================================================

CREATE TABLE IF NOT EXISTS aces (
    item_id TEXT NOT NULL,
    row_no INTEGER NOT NULL,
    principal_name TEXT NOT NULL,
    is_group INTEGER NOT NULL DEFAULT 0,
    privilege_names TEXT NOT NULL,
    is_allow INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (item_id, row_no)
);

-- ============================================================================
-- TABLE: locks
-- ============================================================================

CREATE TABLE IF NOT EXISTS locks (
    item_id TEXT PRIMARY KEY NOT NULL,
    lock_token TEXT NOT NULL UNIQUE,
    lock_created INTEGER NOT NULL,
    is_deep INTEGER NOT NULL DEFAULT 0,
    session_id TEXT,
    principal_name TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_locks_principal ON locks(principal_name);
CREATE INDEX IF NOT EXISTS idx_locks_session ON locks(session_id);

-- ============================================================================
-- TABLE: files
-- ============================================================================
-- Sized index over the blob store.

CREATE TABLE IF NOT EXISTS files (
    file_id TEXT PRIMARY KEY NOT NULL,
    file_size INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_files_deleted ON files(is_deleted);

-- ============================================================================
-- TABLE: journal
-- ============================================================================

CREATE TABLE IF NOT EXISTS journal (
    transaction_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    journal_id TEXT NOT NULL,
    event_occurred INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    item_id TEXT NOT NULL,
    item_path TEXT NOT NULL,
    primary_type TEXT,
    property_name TEXT,
    user_id TEXT,
    user_data TEXT,
    event_info TEXT,
    source_path TEXT,
    destination_path TEXT,
    PRIMARY KEY (transaction_id, journal_id)
);

CREATE INDEX IF NOT EXISTS idx_journal_item ON journal(transaction_id, item_id, event_type);
CREATE INDEX IF NOT EXISTS idx_journal_occurred ON journal(event_occurred);

-- ============================================================================
-- TABLE: namespaces
-- ============================================================================

CREATE TABLE IF NOT EXISTS namespaces (
    namespace_prefix TEXT PRIMARY KEY NOT NULL,
    namespace_uri TEXT NOT NULL UNIQUE
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        let version = get_current_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();

        let version = get_current_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_all_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            let rows = stmt.query_map([], |row| row.get(0)).unwrap();
            rows.filter_map(Result::ok).collect()
        };

        for table in ["items", "properties", "aces", "locks", "files", "journal", "namespaces"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_one_lock_per_item() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO locks (item_id, lock_token, lock_created, principal_name) VALUES ('n1', 't1', 0, 'u')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO locks (item_id, lock_token, lock_created, principal_name) VALUES ('n1', 't2', 0, 'u')",
            [],
        );
        assert!(dup.is_err());
    }
}
