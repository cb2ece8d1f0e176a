use rusqlite::Connection;

use palaver_core::StoreError;

/// Applies every migration newer than the recorded schema version.
pub fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| {
        StoreError::Backend(format!("failed to create migrations table: {e}"))
    })?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            StoreError::Backend(format!("failed to query migration version: {e}"))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("applied migration v1: turns");
    }
    Ok(())
}

/// Version 1: the turn log.
///
/// `seq` records insertion order, which breaks ties between equal
/// `created_at` values. Timestamps are microseconds since the epoch.
fn apply_v1(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(StoreError::backend)?;
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS turns (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            conversation    TEXT NOT NULL,
            role            TEXT NOT NULL CHECK (role IN ('user', 'model')),
            parts           TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_turns_conversation
            ON turns (conversation, created_at, seq);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'turns');
        ",
    )
    .map_err(|e| StoreError::Backend(format!("migration v1 failed: {e}")))?;
    tx.commit().map_err(StoreError::backend)
}
