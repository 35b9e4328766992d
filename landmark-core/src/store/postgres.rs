//! PostgreSQL-backed [`Store`] implementation.
//!
//! Mirrors [`super::mysql::MySqlStore`]'s schema and batching, adapted
//! to Postgres idiom: `bytea` columns instead of `binary(n)`, `$n`
//! placeholders, and `ON CONFLICT DO NOTHING` in place of
//! `INSERT IGNORE` to discard duplicate postings.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::{sorted_batches, Clip, HashPosting, Result, Store, StoreError};
use crate::extract::Hash;
use crate::hash::Digest20;

/// Connection settings for [`PostgresStore::connect`].
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database host.
    pub host: String,
    /// Database port, defaulting to 5432.
    pub port: u16,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database name.
    pub database: String,
    /// Connection timeout, in seconds.
    pub connect_timeout_secs: u64,
}

/// PostgreSQL-backed index store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to Postgres and ensures the schema exists.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let url = format!(
            "postgres://{}:{}@{}:{}/{}",
            config.user, config.password, config.host, config.port, config.database
        );

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Wraps an already-open pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clip (
                clip_id BIGSERIAL PRIMARY KEY,
                name VARCHAR(250) NOT NULL,
                fingerprinted BOOLEAN NOT NULL DEFAULT FALSE,
                content_digest BYTEA NOT NULL,
                duration DOUBLE PRECISION,
                owner_id BIGINT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hash_posting (
                hash BYTEA NOT NULL,
                clip_id BIGINT NOT NULL REFERENCES clip(clip_id) ON DELETE CASCADE,
                "offset" BIGINT NOT NULL,
                UNIQUE (hash, clip_id, "offset")
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS hash_posting_hash_idx ON hash_posting (hash);")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clip_tag (
                id BIGSERIAL PRIMARY KEY,
                clip_id BIGINT NOT NULL REFERENCES clip(clip_id) ON DELETE CASCADE,
                tag_id BIGINT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_clip(
        &self,
        name: &str,
        content_digest: &Digest20,
        duration: f64,
        owner_id: Option<i64>,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO clip (name, content_digest, duration, owner_id) VALUES ($1, $2, $3, $4) RETURNING clip_id",
        )
        .bind(name)
        .bind(content_digest.as_slice())
        .bind(duration)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        row.try_get(0).map_err(StoreError::from)
    }

    async fn insert_tags(&self, clip_id: i64, tag_ids: &[i64]) -> Result<()> {
        if tag_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for tag_id in tag_ids {
            sqlx::query("INSERT INTO clip_tag (clip_id, tag_id) VALUES ($1, $2)")
                .bind(clip_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_hashes(&self, clip_id: i64, pairs: &[(Hash, u32)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for batch in sorted_batches(pairs) {
            for (hash, offset) in &batch {
                sqlx::query(
                    r#"INSERT INTO hash_posting (hash, clip_id, "offset") VALUES ($1, $2, $3)
                       ON CONFLICT DO NOTHING"#,
                )
                .bind(hash.as_slice())
                .bind(clip_id)
                .bind(*offset as i64)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_fingerprinted(&self, clip_id: i64) -> Result<()> {
        sqlx::query("UPDATE clip SET fingerprinted = TRUE WHERE clip_id = $1")
            .bind(clip_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn lookup(&self, hashes: &HashSet<Hash>) -> Result<Vec<HashPosting>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for chunk in hashes.iter().collect::<Vec<_>>().chunks(super::INSERT_BATCH_SIZE) {
            let placeholders = (1..=chunk.len())
                .map(|i| format!("${i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let query_str = format!(
                r#"SELECT hash, clip_id, "offset" FROM hash_posting WHERE hash IN ({placeholders})"#
            );
            let mut query = sqlx::query(&query_str);
            for hash in chunk {
                query = query.bind(hash.as_slice());
            }

            let rows = query.fetch_all(&self.pool).await?;
            for row in rows {
                let hash_bytes: Vec<u8> = row.try_get(0)?;
                let mut hash = [0u8; 10];
                if hash_bytes.len() == 10 {
                    hash.copy_from_slice(&hash_bytes);
                }
                out.push(HashPosting {
                    hash,
                    clip_id: row.try_get(1)?,
                    offset: row.try_get::<i64, _>(2)? as u32,
                });
            }
        }

        Ok(out)
    }

    async fn list_clip_digests(&self) -> Result<HashSet<Digest20>> {
        let rows = sqlx::query("SELECT content_digest FROM clip WHERE fingerprinted = TRUE")
            .fetch_all(&self.pool)
            .await?;

        let mut digests = HashSet::with_capacity(rows.len());
        for row in rows {
            let bytes: Vec<u8> = row.try_get(0)?;
            let mut digest = [0u8; 20];
            if bytes.len() == 20 {
                digest.copy_from_slice(&bytes);
                digests.insert(digest);
            }
        }
        Ok(digests)
    }

    async fn get_clip(&self, clip_id: i64) -> Result<Option<Clip>> {
        let row = sqlx::query(
            "SELECT clip_id, name, content_digest, duration, fingerprinted, owner_id FROM clip WHERE clip_id = $1",
        )
        .bind(clip_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let digest_bytes: Vec<u8> = row.try_get("content_digest")?;
        let mut content_digest = [0u8; 20];
        if digest_bytes.len() == 20 {
            content_digest.copy_from_slice(&digest_bytes);
        }

        Ok(Some(Clip {
            clip_id: row.try_get("clip_id")?,
            name: row.try_get("name")?,
            content_digest,
            duration: row.try_get::<f64, _>("duration")?,
            fingerprinted: row.try_get("fingerprinted")?,
            owner_id: row.try_get("owner_id")?,
        }))
    }

    async fn get_tags(&self, clip_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT tag_id FROM clip_tag WHERE clip_id = $1")
            .bind(clip_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.try_get::<i64, _>(0).map_err(StoreError::from))
            .collect()
    }

    async fn delete_unfingerprinted(&self) -> Result<()> {
        sqlx::query("DELETE FROM clip WHERE fingerprinted = FALSE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
