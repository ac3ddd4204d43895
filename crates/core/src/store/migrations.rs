//! Schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each pending migration runs
//! in its own transaction together with its bookkeeping row, so a failure
//! leaves the schema at the last complete version.

use tokio_rusqlite::{Connection, params, rusqlite};

use super::Error;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// In application order.
const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "cache_store", sql: include_str!("../../migrations/001_cache_store.sql") },
    Migration { version: 2, name: "deferred_tasks", sql: include_str!("../../migrations/002_deferred_tasks.sql") },
];

/// Apply every migration newer than the recorded version. Returns the
/// versions applied by this call.
pub async fn run(conn: &Connection) -> Result<Vec<i64>, Error> {
    conn.call(|conn| -> Result<Vec<i64>, Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                applied_at TEXT NOT NULL
            )",
        )?;

        let current: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

        let mut applied = Vec::new();
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            apply(conn, migration)
                .map_err(|e| Error::MigrationFailed(format!("{} ({}): {e}", migration.version, migration.name)))?;
            tracing::debug!(version = migration.version, name = migration.name, "migration applied");
            applied.push(migration.version);
        }

        Ok(applied)
    })
    .await
    .map_err(Error::from)
}

fn apply(conn: &mut rusqlite::Connection, migration: &Migration) -> Result<(), rusqlite::Error> {
    let tx = conn.transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![migration.version, migration.name, chrono::Utc::now().to_rfc3339()],
    )?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_exists(conn: &Connection, name: &'static str) -> bool {
        conn.call(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                params![name],
                |row| row.get(0),
            )
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_gets_every_table() {
        let conn = Connection::open_in_memory().await.unwrap();
        let applied = run(&conn).await.unwrap();

        assert_eq!(applied, vec![1, 2]);
        assert!(table_exists(&conn, "generations").await);
        assert!(table_exists(&conn, "entries").await);
        assert!(table_exists(&conn, "deferred_tasks").await);
    }

    #[tokio::test]
    async fn test_second_run_applies_nothing() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();
        assert!(run(&conn).await.unwrap().is_empty());

        let names: Vec<String> = conn
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare("SELECT name FROM _migrations ORDER BY version")?;
                let rows = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()?;
                Ok(rows)
            })
            .await
            .unwrap();
        assert_eq!(names, vec!["cache_store".to_string(), "deferred_tasks".to_string()]);
    }
}
