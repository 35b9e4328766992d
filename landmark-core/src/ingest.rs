//! Parallel corpus ingestion (§4.4).
//!
//! Decoding and extraction are embarrassingly parallel across files, so
//! the worker stage uses `rayon`'s `par_iter` exactly the way `needle`'s
//! `Analyzer::run` distributes per-file work. All mutations to the
//! [`Store`] are then applied from a single coordinator loop, draining
//! the worker results one at a time, mirroring `tramscore`'s
//! `multiprocessing.Pool.imap_unordered` + single-threaded result loop
//! in `Tramscore.fingerprint_directory`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tokio::sync::Mutex;

use crate::decode::{Decoder, FfmpegDecoder};
use crate::extract::{extract_channels, Extractor, Hash};
use crate::hash::Digest20;
use crate::store::Store;
use crate::{Error, Result};

/// Outcome of fingerprinting a single file, handed from a worker back
/// to the coordinator.
struct WorkerResult {
    name: String,
    hashes: Vec<(Hash, u32)>,
    content_digest: Digest20,
    duration: f64,
}

/// Coordinates parallel fingerprinting of a corpus of reference clips.
pub struct Ingestor {
    store: Arc<dyn Store>,
    decoder: Arc<dyn Decoder>,
    extractor: Extractor,
    fingerprint_limit: Option<f64>,
    /// Content digests of already-fingerprinted clips, loaded from the
    /// store on first use and kept current after every successful
    /// ingest so repeated calls never re-query the store just to find
    /// out a file was already seen.
    digest_cache: Mutex<Option<HashSet<Digest20>>>,
}

impl Ingestor {
    /// Builds an ingestor over `store`, decoding at most
    /// `fingerprint_limit` seconds of each file (`None` for no limit).
    pub fn new(store: Arc<dyn Store>, fingerprint_limit: Option<f64>) -> Self {
        Self::with_decoder(store, fingerprint_limit, Arc::new(FfmpegDecoder))
    }

    /// Like [`Ingestor::new`], with an explicit [`Decoder`] -- used in
    /// tests to drive ingestion without real audio files.
    pub fn with_decoder(
        store: Arc<dyn Store>,
        fingerprint_limit: Option<f64>,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        Self {
            store,
            decoder,
            extractor: Extractor::new(),
            fingerprint_limit,
            digest_cache: Mutex::new(None),
        }
    }

    /// Returns the cached digest set, populating it from the store on
    /// first call.
    async fn cached_digests(&self) -> Result<HashSet<Digest20>> {
        let mut cache = self.digest_cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.store.list_clip_digests().await?);
        }
        Ok(cache.as_ref().cloned().unwrap_or_default())
    }

    /// Records a newly-ingested digest in the cache, if it is loaded.
    async fn remember_digest(&self, digest: Digest20) {
        if let Some(set) = self.digest_cache.lock().await.as_mut() {
            set.insert(digest);
        }
    }

    /// Enumerates files under `path` matching `extensions`, skips
    /// already-fingerprinted content, and ingests the rest.
    ///
    /// Returns the number of clips successfully ingested. Individual
    /// worker failures are logged and skipped; they never abort the
    /// batch.
    pub async fn ingest_directory(&self, path: &Path, extensions: &[&str]) -> Result<usize> {
        if !path.exists() {
            return Err(Error::PathNotFound(path.to_path_buf()));
        }

        let known_digests = self.cached_digests().await?;
        let candidates = find_files(path, extensions);

        let mut to_fingerprint = Vec::new();
        for file in candidates {
            match crate::hash::content_digest(&file) {
                Ok(digest) if known_digests.contains(&digest) => {
                    tracing::debug!(path = %file.display(), "already fingerprinted, skipping");
                }
                Ok(_) => to_fingerprint.push(file),
                Err(err) => {
                    tracing::warn!(path = %file.display(), error = %err, "failed to hash file, skipping");
                }
            }
        }

        let results = self.run_workers(&to_fingerprint);

        let mut ingested = 0;
        for result in results {
            match self.commit(result, None, &[]).await {
                Ok(_) => ingested += 1,
                Err(err) => tracing::warn!(error = %err, "failed to commit ingested clip"),
            }
        }

        Ok(ingested)
    }

    /// Ingests a single file, optionally attaching `owner_id` and
    /// `tag_ids` before marking it fingerprinted.
    pub async fn ingest_file(
        &self,
        path: &Path,
        owner_id: Option<i64>,
        tag_ids: &[i64],
    ) -> Result<i64> {
        if !path.exists() {
            return Err(Error::PathNotFound(path.to_path_buf()));
        }

        let known_digests = self.cached_digests().await?;
        let digest = crate::hash::content_digest(path)?;
        if known_digests.contains(&digest) {
            tracing::debug!(path = %path.display(), "already fingerprinted, skipping");
            return Err(Error::Config(format!(
                "{} already fingerprinted",
                path.display()
            )));
        }

        let result = self.fingerprint_one(path)?;
        self.commit(result, owner_id, tag_ids).await
    }

    /// Runs decode + extract for every candidate file, in parallel when
    /// the `rayon` feature is enabled.
    fn run_workers(&self, files: &[PathBuf]) -> Vec<WorkerResult> {
        let fingerprint_one = |path: &PathBuf| match self.fingerprint_one(path) {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed fingerprinting, skipping");
                None
            }
        };

        #[cfg(feature = "rayon")]
        {
            files.par_iter().filter_map(fingerprint_one).collect()
        }

        #[cfg(not(feature = "rayon"))]
        {
            files.iter().filter_map(fingerprint_one).collect()
        }
    }

    fn fingerprint_one(&self, path: &Path) -> Result<WorkerResult> {
        let decoded = self.decoder.decode(path, self.fingerprint_limit)?;
        let hashes: Vec<(Hash, u32)> =
            extract_channels(&self.extractor, &decoded.channels).into_iter().collect();

        Ok(WorkerResult {
            name: path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string(),
            hashes,
            content_digest: decoded.content_digest,
            duration: decoded.duration_seconds,
        })
    }

    /// Applies the four store mutations for one clip in order:
    /// `insert_clip` -> `insert_hashes` -> `insert_tags` (if any) ->
    /// `mark_fingerprinted`.
    async fn commit(
        &self,
        result: WorkerResult,
        owner_id: Option<i64>,
        tag_ids: &[i64],
    ) -> Result<i64> {
        let clip_id = self
            .store
            .insert_clip(&result.name, &result.content_digest, result.duration, owner_id)
            .await?;

        self.store.insert_hashes(clip_id, &result.hashes).await?;

        if !tag_ids.is_empty() {
            self.store.insert_tags(clip_id, tag_ids).await?;
        }

        self.store.mark_fingerprinted(clip_id).await?;
        self.remember_digest(result.content_digest).await;

        tracing::info!(clip_id, name = %result.name, landmarks = result.hashes.len(), "ingested clip");
        Ok(clip_id)
    }

    /// Garbage-collects clips inserted but never fingerprinted, e.g.
    /// after a crash between `insert_clip` and `mark_fingerprinted`.
    /// Should be called once at startup.
    pub async fn delete_unfingerprinted(&self) -> Result<()> {
        self.store.delete_unfingerprinted().await.map_err(Error::from)
    }
}

/// Walks `root` recursively, yielding files whose extension (case
/// insensitive) matches one of `extensions`.
fn find_files(root: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let wanted: HashSet<String> = extensions.iter().map(|e| e.to_lowercase()).collect();
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if wanted.contains(&ext.to_lowercase()) {
                    out.push(path);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn find_files_matches_extension_case_insensitively() {
        let dir = std::env::temp_dir().join(format!("landmark-ingest-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.WAV"), b"").unwrap();
        std::fs::write(dir.join("b.mp3"), b"").unwrap();
        std::fs::write(dir.join("c.txt"), b"").unwrap();

        let found = find_files(&dir, &["wav", "mp3"]);
        assert_eq!(found.len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
