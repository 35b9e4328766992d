//! Index store trait and backend implementations (§4.3).
//!
//! The store persists [`Clip`] rows and the hash postings that belong
//! to them. The trait is intentionally narrow: decode, extraction, and
//! matching never need more than what is declared here, and every
//! backend is interchangeable behind it.

mod mysql;
mod postgres;

pub use mysql::{MySqlConfig, MySqlStore};
pub use postgres::{PostgresConfig, PostgresStore};

use std::collections::HashSet;

use async_trait::async_trait;

use crate::hash::Digest20;

/// Errors returned by a [`Store`] implementation.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The underlying SQL driver returned an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A hex-encoded hash or digest in a query result was malformed.
    #[error("malformed hash in store row: {0}")]
    MalformedHash(#[from] hex::FromHexError),
    /// `get_clip` or similar was called with an id that does not exist.
    #[error("clip {0} not found")]
    ClipNotFound(i64),
}

/// Result type for [`Store`] operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A fingerprinted reference audio item.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    /// Stable integer identifier.
    pub clip_id: i64,
    /// Human-readable name, usually the source file name.
    pub name: String,
    /// SHA-1 content digest, used upstream for dedup.
    pub content_digest: Digest20,
    /// Duration of the clip, in seconds.
    pub duration: f64,
    /// Whether ingestion has completed for this clip.
    pub fingerprinted: bool,
    /// Owning principal, if any.
    pub owner_id: Option<i64>,
}

/// A single `(hash, clip_id, offset)` posting as returned by `lookup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPosting {
    /// The landmark hash.
    pub hash: crate::extract::Hash,
    /// The clip this posting belongs to.
    pub clip_id: i64,
    /// The frame offset at which the hash occurred in the reference clip.
    pub offset: u32,
}

/// Persists clips and hash postings, and answers multi-hash lookups.
///
/// Implementations must make `insert_hashes` transactional (all pairs
/// for one call become visible atomically) and must silently discard
/// duplicate `(hash, clip_id, offset)` triples rather than erroring.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a new clip with `fingerprinted = false` and returns its id.
    ///
    /// Content digest uniqueness is not enforced here; the ingestor
    /// deduplicates upstream via [`Store::list_clip_digests`].
    async fn insert_clip(
        &self,
        name: &str,
        content_digest: &Digest20,
        duration: f64,
        owner_id: Option<i64>,
    ) -> Result<i64>;

    /// Attaches opaque tag ids to a clip.
    async fn insert_tags(&self, clip_id: i64, tag_ids: &[i64]) -> Result<()>;

    /// Durably persists `(hash, offset)` pairs for `clip_id`.
    ///
    /// Batches internally (recommended batch size ~1000) and inserts in
    /// sorted-by-hash order to reduce index-page contention.
    async fn insert_hashes(
        &self,
        clip_id: i64,
        pairs: &[(crate::extract::Hash, u32)],
    ) -> Result<()>;

    /// Flips the `fingerprinted` flag. Idempotent.
    async fn mark_fingerprinted(&self, clip_id: i64) -> Result<()>;

    /// Looks up every posting whose hash is in `hashes`.
    ///
    /// Returns an empty vector without contacting the backend when
    /// `hashes` is empty. Order of results is unspecified.
    async fn lookup(&self, hashes: &HashSet<crate::extract::Hash>) -> Result<Vec<HashPosting>>;

    /// Returns the content digests of all fingerprinted clips.
    async fn list_clip_digests(&self) -> Result<HashSet<Digest20>>;

    /// Fetches a clip by id.
    async fn get_clip(&self, clip_id: i64) -> Result<Option<Clip>>;

    /// Fetches the tag ids attached to a clip.
    async fn get_tags(&self, clip_id: i64) -> Result<Vec<i64>>;

    /// Garbage-collects clips inserted but never fingerprinted, e.g.
    /// after a crash between `insert_clip` and `mark_fingerprinted`.
    /// Called at startup.
    async fn delete_unfingerprinted(&self) -> Result<()>;
}

/// Recommended batch size for `insert_hashes`, matching the original's
/// sorted-batch-of-1000 insert pattern.
pub(crate) const INSERT_BATCH_SIZE: usize = 1000;

/// Splits postings into sorted batches for `insert_hashes`
/// implementations to iterate over.
pub(crate) fn sorted_batches(
    pairs: &[(crate::extract::Hash, u32)],
) -> Vec<Vec<(crate::extract::Hash, u32)>> {
    let mut sorted: Vec<_> = pairs.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
        .chunks(INSERT_BATCH_SIZE)
        .map(|chunk| chunk.to_vec())
        .collect()
}
