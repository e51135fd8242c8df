//! Schema for the libSQL table store.
//!
//! Steps are numbered and applied in order; `_migrations` records which
//! versions a database already has.

use libsql::Connection;

use crate::error::StoreError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "grid_tables",
        sql: r#"
            CREATE TABLE IF NOT EXISTS grid_tables (
                name TEXT PRIMARY KEY,
                header TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS grid_rows (
                table_name TEXT NOT NULL REFERENCES grid_tables(name) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                cells TEXT NOT NULL,
                PRIMARY KEY (table_name, position)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "grid_rows_position_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_grid_rows_table_position
                ON grid_rows(table_name, position);
        "#,
    },
];

/// Bring the schema up to the latest version.
///
/// Each pending step runs in its own transaction together with its
/// `_migrations` record, so a failed step leaves the previous version intact.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .await
    .map_err(|e| StoreError::Migration(format!("bookkeeping table: {e}")))?;

    let from = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > from).collect();
    if pending.is_empty() {
        tracing::debug!(version = from, "Table store schema up to date");
        return Ok(());
    }

    for step in pending {
        apply(conn, step).await?;
    }
    tracing::info!(from, to = schema_version(conn).await?, "Table store schema migrated");
    Ok(())
}

async fn apply(conn: &Connection, step: &Migration) -> Result<(), StoreError> {
    let failed =
        |e: libsql::Error| StoreError::Migration(format!("V{} {}: {e}", step.version, step.name));

    tracing::info!(version = step.version, name = step.name, "Applying migration");
    let tx = conn.transaction().await.map_err(failed)?;
    tx.execute_batch(step.sql).await.map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![step.version, step.name],
    )
    .await
    .map_err(failed)?;
    tx.commit().await.map_err(failed)
}

/// Highest applied migration, 0 on a fresh database.
pub async fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("schema version: {e}")))?;
    let Some(row) = rows
        .next()
        .await
        .map_err(|e| StoreError::Migration(format!("schema version: {e}")))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(|e| StoreError::Migration(format!("schema version: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_conn() -> Connection {
        libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap()
            .connect()
            .unwrap()
    }

    #[tokio::test]
    async fn migrations_create_grid_tables() {
        let conn = memory_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["grid_tables", "grid_rows", "_migrations"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = memory_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = schema_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }
}
