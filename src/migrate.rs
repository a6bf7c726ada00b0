use anyhow::Result;
use sqlx::SqlitePool;

/// Creates the index schema. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per indexed catalog
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_namespaces (
            name TEXT PRIMARY KEY,
            catalog_url TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per collection, vectors as little-endian f32 BLOBs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            namespace TEXT NOT NULL,
            collection_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            embedding BLOB NOT NULL,
            PRIMARY KEY (namespace, collection_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
