//! The document store: a single logical collection of versioned
//! metadata documents, discriminated by `resource_type`, backed by
//! `sqlx` against SQLite.
//!
//! The spec's compound indices become real SQL indices (see
//! `SPEC_FULL.md` §10); `(resource_id, is_latest)` additionally carries
//! a partial unique index so invariant 1 (at-most-one-latest) is
//! enforced by the database itself, not only by the per-resource lock.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::time::Duration;

use crate::error::{LexError, Result};
use crate::resource::ResourceType;

/// One row of the `lex_resources` table, deserialized.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub namespace: String,
    pub version: String,
    pub data_hash: String,
    pub is_latest: bool,
    pub supersedes: Option<String>,
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub document: serde_json::Value,
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentRow> {
    let resource_type_str: String = row.try_get("resource_type")?;
    let resource_type = parse_resource_type(&resource_type_str)?;
    let document_str: String = row.try_get("document")?;
    let document: serde_json::Value = serde_json::from_str(&document_str)?;
    Ok(DocumentRow {
        id: row.try_get("id")?,
        resource_id: row.try_get("resource_id")?,
        resource_type,
        namespace: row.try_get("namespace")?,
        version: row.try_get("version")?,
        data_hash: row.try_get("data_hash")?,
        is_latest: row.try_get::<i64, _>("is_latest")? != 0,
        supersedes: row.try_get("supersedes")?,
        superseded_by: row.try_get("superseded_by")?,
        created_at: row.try_get("created_at")?,
        document,
    })
}

fn parse_resource_type(s: &str) -> Result<ResourceType> {
    for rt in [
        ResourceType::Corpus,
        ResourceType::SearchIndex,
        ResourceType::TrieIndex,
        ResourceType::SemanticIndex,
        ResourceType::DictionaryEntry,
        ResourceType::LiteratureEntry,
        ResourceType::LanguageEntry,
    ] {
        if rt.as_str() == s {
            return Ok(rt);
        }
    }
    Err(LexError::CorruptedCache(format!(
        "unknown resource_type stored in document store: {s}"
    )))
}

/// Document store connection configuration.
#[derive(Debug, Clone)]
pub struct DocumentStoreConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        DocumentStoreConfig {
            url: "sqlite://lexistore.db".to_string(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// The versioned metadata document store.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn connect(config: DocumentStoreConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await?;
        let store = DocumentStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lex_resources (
                id             TEXT PRIMARY KEY,
                resource_id    TEXT NOT NULL,
                resource_type  TEXT NOT NULL,
                namespace      TEXT NOT NULL,
                version        TEXT NOT NULL,
                data_hash      TEXT NOT NULL,
                is_latest      INTEGER NOT NULL,
                supersedes     TEXT,
                superseded_by  TEXT,
                created_at     TEXT NOT NULL,
                document       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS lex_resources_latest \
             ON lex_resources(resource_id, resource_type) WHERE is_latest = 1",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS lex_resources_version \
             ON lex_resources(resource_id, resource_type, version)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS lex_resources_hash \
             ON lex_resources(resource_id, resource_type, data_hash)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a new version row and, when `prior_id` is set, flip its
    /// `is_latest` flag in the same transaction (§4.5.1 steps 7–8).
    pub async fn insert_version_and_supersede(
        &self,
        new_row: &DocumentRow,
        prior_id: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(prior_id) = prior_id {
            let result = sqlx::query(
                "UPDATE lex_resources SET is_latest = 0, superseded_by = ? WHERE id = ? AND is_latest = 1",
            )
            .bind(&new_row.id)
            .bind(prior_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(LexError::ConcurrencyConflict(new_row.resource_id.clone()));
            }
        }

        let document_str = serde_json::to_string(&new_row.document)?;
        sqlx::query(
            r#"
            INSERT INTO lex_resources
                (id, resource_id, resource_type, namespace, version, data_hash,
                 is_latest, supersedes, superseded_by, created_at, document)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new_row.id)
        .bind(&new_row.resource_id)
        .bind(new_row.resource_type.as_str())
        .bind(&new_row.namespace)
        .bind(&new_row.version)
        .bind(&new_row.data_hash)
        .bind(new_row.is_latest as i64)
        .bind(&new_row.supersedes)
        .bind(&new_row.superseded_by)
        .bind(new_row.created_at.to_rfc3339())
        .bind(document_str)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn find_latest(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<Option<DocumentRow>> {
        let row = sqlx::query(
            "SELECT * FROM lex_resources WHERE resource_id = ? AND resource_type = ? AND is_latest = 1",
        )
        .bind(resource_id)
        .bind(resource_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    pub async fn find_by_version(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        version: &str,
    ) -> Result<Option<DocumentRow>> {
        let row = sqlx::query(
            "SELECT * FROM lex_resources WHERE resource_id = ? AND resource_type = ? AND version = ?",
        )
        .bind(resource_id)
        .bind(resource_type.as_str())
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    pub async fn find_by_hash(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        data_hash: &str,
    ) -> Result<Option<DocumentRow>> {
        let row = sqlx::query(
            "SELECT * FROM lex_resources WHERE resource_id = ? AND resource_type = ? AND data_hash = ?",
        )
        .bind(resource_id)
        .bind(resource_type.as_str())
        .bind(data_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    pub async fn list_versions(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<DocumentRow>> {
        let rows = sqlx::query(
            "SELECT * FROM lex_resources WHERE resource_id = ? AND resource_type = ? ORDER BY created_at ASC",
        )
        .bind(resource_id)
        .bind(resource_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    /// Delete every version in a resource's chain. Returns the count
    /// removed (0 for an unknown `resource_id`, never an error — per
    /// the spec's boundary behavior for delete of an unknown resource).
    pub async fn delete_all_versions(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM lex_resources WHERE resource_id = ? AND resource_type = ?")
            .bind(resource_id)
            .bind(resource_type.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Find the latest-version rows of `resource_type` whose document
    /// has `field = value` at the top level. Used for cascade deletion
    /// lookups (e.g. `SearchIndex` rows with a given `corpus_id`) and
    /// for the Corpus dual-key lookup by `corpus_name`.
    pub async fn find_latest_by_field(
        &self,
        resource_type: ResourceType,
        field: &str,
        value: &str,
    ) -> Result<Vec<DocumentRow>> {
        let sql = format!(
            "SELECT * FROM lex_resources WHERE resource_type = ? AND is_latest = 1 \
             AND json_extract(document, '$.{field}') = ?"
        );
        let rows = sqlx::query(&sql)
            .bind(resource_type.as_str())
            .bind(value)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_document).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> DocumentStore {
        DocumentStore::connect(DocumentStoreConfig {
            url: "sqlite::memory:".to_string(),
            ..DocumentStoreConfig::default()
        })
        .await
        .unwrap()
    }

    fn sample_row(resource_id: &str, is_latest: bool) -> DocumentRow {
        DocumentRow {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.to_string(),
            resource_type: ResourceType::Corpus,
            namespace: "corpus".to_string(),
            version: "1.0.0".to_string(),
            data_hash: "deadbeef".to_string(),
            is_latest,
            supersedes: None,
            superseded_by: None,
            created_at: Utc::now(),
            document: serde_json::json!({"corpus_name": "x"}),
        }
    }

    #[tokio::test]
    async fn insert_then_find_latest() {
        let store = store().await;
        let row = sample_row("c1", true);
        store.insert_version_and_supersede(&row, None).await.unwrap();
        let found = store.find_latest("c1", ResourceType::Corpus).await.unwrap();
        assert_eq!(found.unwrap().id, row.id);
    }

    #[tokio::test]
    async fn supersede_flips_prior_flag() {
        let store = store().await;
        let first = sample_row("c1", true);
        store.insert_version_and_supersede(&first, None).await.unwrap();

        let mut second = sample_row("c1", true);
        second.version = "2.0.0".to_string();
        second.supersedes = Some(first.id.clone());
        store
            .insert_version_and_supersede(&second, Some(&first.id))
            .await
            .unwrap();

        let versions = store.list_versions("c1", ResourceType::Corpus).await.unwrap();
        assert_eq!(versions.len(), 2);
        let latest = store.find_latest("c1", ResourceType::Corpus).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn delete_unknown_resource_returns_zero() {
        let store = store().await;
        let count = store
            .delete_all_versions("does-not-exist", ResourceType::Corpus)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn find_latest_by_field_matches_typed_field() {
        let store = store().await;
        let row = sample_row("c1", true);
        store.insert_version_and_supersede(&row, None).await.unwrap();
        let found = store
            .find_latest_by_field(ResourceType::Corpus, "corpus_name", "x")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
