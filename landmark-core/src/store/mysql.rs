//! MySQL-backed [`Store`] implementation.
//!
//! Schema and query shapes follow `tramscore`'s `SQLDatabase`: hashes
//! travel as `UNHEX`/`HEX` binary columns, inserts use `INSERT IGNORE`
//! to silently discard duplicate `(hash, clip_id, offset)` triples, and
//! `insert_hashes` commits its sorted batches inside a single
//! transaction.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySql, MySqlPool, Row};

use super::{sorted_batches, Clip, HashPosting, Result, Store, StoreError};
use crate::extract::Hash;
use crate::hash::Digest20;

/// Connection settings for [`MySqlStore::connect`].
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    /// Database host.
    pub host: String,
    /// Database port, defaulting to 3306.
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

/// MySQL-backed index store, pooling a small fixed number of
/// connections as mandated by the concurrency model (≤ 5).
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connects to MySQL and ensures the schema exists.
    pub async fn connect(config: &MySqlConfig) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}:{}/{}",
            config.user, config.password, config.host, config.port, config.database
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Wraps an already-open pool, e.g. one shared with other subsystems.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clip (
                clip_id MEDIUMINT UNSIGNED NOT NULL AUTO_INCREMENT,
                name VARCHAR(250) NOT NULL,
                fingerprinted TINYINT NOT NULL DEFAULT 0,
                content_digest BINARY(20) NOT NULL,
                duration DOUBLE,
                owner_id INT,
                PRIMARY KEY (clip_id)
            ) ENGINE=INNODB;
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hash_posting (
                hash BINARY(10) NOT NULL,
                clip_id MEDIUMINT UNSIGNED NOT NULL,
                `offset` INT UNSIGNED NOT NULL,
                INDEX (hash),
                UNIQUE KEY unique_posting (hash, clip_id, `offset`),
                FOREIGN KEY (clip_id) REFERENCES clip(clip_id) ON DELETE CASCADE
            ) ENGINE=INNODB;
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clip_tag (
                id MEDIUMINT UNSIGNED NOT NULL AUTO_INCREMENT,
                clip_id MEDIUMINT UNSIGNED NOT NULL,
                tag_id INT NOT NULL,
                PRIMARY KEY (id),
                FOREIGN KEY (clip_id) REFERENCES clip(clip_id) ON DELETE CASCADE
            ) ENGINE=INNODB;
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn insert_clip(
        &self,
        name: &str,
        content_digest: &Digest20,
        duration: f64,
        owner_id: Option<i64>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO clip (name, content_digest, duration, owner_id) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(content_digest.as_slice())
        .bind(duration)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_id() as i64)
    }

    async fn insert_tags(&self, clip_id: i64, tag_ids: &[i64]) -> Result<()> {
        if tag_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for tag_id in tag_ids {
            sqlx::query("INSERT INTO clip_tag (clip_id, tag_id) VALUES (?, ?)")
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
                // INSERT IGNORE discards duplicate (hash, clip_id, offset)
                // triples, matching the unique_posting constraint.
                sqlx::query("INSERT IGNORE INTO hash_posting (hash, clip_id, `offset`) VALUES (?, ?, ?)")
                    .bind(hash.as_slice())
                    .bind(clip_id)
                    .bind(offset)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn mark_fingerprinted(&self, clip_id: i64) -> Result<()> {
        sqlx::query("UPDATE clip SET fingerprinted = 1 WHERE clip_id = ?")
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
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let query_str = format!(
                "SELECT hash, clip_id, `offset` FROM hash_posting WHERE hash IN ({placeholders})"
            );
            let mut query = sqlx::query_as::<MySql, (Vec<u8>, i64, i64)>(&query_str);
            for hash in chunk {
                query = query.bind(hash.as_slice());
            }

            let rows = query.fetch_all(&self.pool).await?;
            for (hash_bytes, clip_id, offset) in rows {
                let mut hash = [0u8; 10];
                if hash_bytes.len() == 10 {
                    hash.copy_from_slice(&hash_bytes);
                }
                out.push(HashPosting {
                    hash,
                    clip_id,
                    offset: offset as u32,
                });
            }
        }

        Ok(out)
    }

    async fn list_clip_digests(&self) -> Result<HashSet<Digest20>> {
        let rows = sqlx::query("SELECT content_digest FROM clip WHERE fingerprinted = 1")
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
            "SELECT clip_id, name, content_digest, duration, fingerprinted, owner_id FROM clip WHERE clip_id = ?",
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
            fingerprinted: row.try_get::<i8, _>("fingerprinted")? != 0,
            owner_id: row.try_get("owner_id")?,
        }))
    }

    async fn get_tags(&self, clip_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT tag_id FROM clip_tag WHERE clip_id = ?")
            .bind(clip_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.try_get::<i64, _>(0).map_err(StoreError::from))
            .collect()
    }

    async fn delete_unfingerprinted(&self) -> Result<()> {
        sqlx::query("DELETE FROM clip WHERE fingerprinted = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
