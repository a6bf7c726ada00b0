//! SQLite-backed [`IndexStore`].
//!
//! Tables (see [`crate::migrate`]):
//!
//! ```text
//! index_namespaces(name PK, catalog_url, created_at)
//! index_entries(namespace, collection_id, title, description, embedding,
//!               PK(namespace, collection_id))
//! ```

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::{db, migrate};

use super::{rank_hits, IndexEntry, IndexHit, IndexStore, NamespaceInfo};

pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `path` and applies the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn put_namespace(
        &self,
        namespace: &str,
        catalog_url: &str,
        entries: &[IndexEntry],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO index_namespaces (name, catalog_url, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET catalog_url = excluded.catalog_url
            "#,
        )
        .bind(namespace)
        .bind(catalog_url)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO index_entries (namespace, collection_id, title, description, embedding)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(namespace, collection_id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    embedding = excluded.embedding
                "#,
            )
            .bind(namespace)
            .bind(&entry.collection_id)
            .bind(&entry.title)
            .bind(&entry.description)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM index_namespaces WHERE name = ?")
                .bind(namespace)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT n.name, n.catalog_url, COUNT(e.collection_id) AS collections
            FROM index_namespaces n
            LEFT JOIN index_entries e ON e.namespace = n.name
            GROUP BY n.name, n.catalog_url
            ORDER BY n.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| NamespaceInfo {
                name: row.get("name"),
                catalog_url: row.get("catalog_url"),
                collections: row.get::<i64, _>("collections") as usize,
            })
            .collect())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM index_entries WHERE namespace = ?")
            .bind(namespace)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM index_namespaces WHERE name = ?")
            .bind(namespace)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn query(
        &self,
        namespace: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let rows = sqlx::query(
            r#"
            SELECT collection_id, title, description, embedding
            FROM index_entries
            WHERE namespace = ?
            "#,
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexHit {
                    collection_id: row.get("collection_id"),
                    title: row.get("title"),
                    description: row.get("description"),
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_hits(hits, limit))
    }
}
