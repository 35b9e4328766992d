//! The `recognize` facade tying decode/extract/match together (§4.6).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::decode::{Decoder, FfmpegDecoder};
use crate::extract::{extract_channels, Extractor, Hash};
use crate::hash::to_hex;
use crate::matcher::Matcher;
use crate::store::Store;
use crate::Result;

/// Minimum relative confidence (percent) for a match to be accepted.
pub const ACCEPT_RELATIVE_CONFIDENCE: f64 = 3.0;

/// Minimum raw aligned-hash count for a match to be accepted.
pub const ACCEPT_CONFIDENCE: u32 = 100;

/// A recognized clip, ready to hand to a downstream consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched clip identifier.
    pub clip_id: i64,
    /// Matched clip name.
    pub clip_name: String,
    /// Aligned-hash count.
    pub confidence: u32,
    /// `100 * confidence / total_query_hashes`, rounded to 2dp.
    pub relative_confidence: f64,
    /// Wall-clock seconds spent in the recognize step, rounded to 2dp.
    pub match_time: f64,
    /// Frame offset of the best alignment.
    pub offset: i64,
    /// Same offset, in seconds, rounded to 5dp.
    pub offset_seconds: f64,
    /// SHA-1 content digest of the matched clip, as uppercase hex.
    pub content_digest: String,
    /// Reference clip length, in seconds.
    pub duration: f64,
    /// Tag ids attached to the matched clip.
    pub tags: Vec<i64>,
}

/// Single entry point tying decode, extraction, and matching together.
pub struct Engine {
    store: Arc<dyn Store>,
    decoder: Arc<dyn Decoder>,
    extractor: Extractor,
    matcher: Matcher,
}

impl Engine {
    /// Builds a recognition engine over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_decoder(store, Arc::new(FfmpegDecoder))
    }

    /// Like [`Engine::new`], with an explicit [`Decoder`] -- used in
    /// tests to drive recognition without real audio files.
    pub fn with_decoder(store: Arc<dyn Store>, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            store,
            decoder,
            extractor: Extractor::new(),
            matcher: Matcher::new(),
        }
    }

    /// Recognizes the audio file at `path`.
    ///
    /// Decodes the file, extracts landmarks from every channel, unions
    /// them, looks up postings, and aligns. Returns `None` if no clip
    /// meets the accept thresholds (`relative_confidence > 3.0` and
    /// `confidence > 100`).
    pub async fn recognize(&self, path: &Path) -> Result<Option<MatchResult>> {
        self.recognize_with_tag(path, None).await
    }

    /// Like [`Engine::recognize`], but additionally requires the
    /// matched clip's tag set to contain `expected_tag_id`. The filter
    /// is applied strictly after matching; it never prunes the index
    /// search itself.
    pub async fn recognize_with_tag(
        &self,
        path: &Path,
        expected_tag_id: Option<i64>,
    ) -> Result<Option<MatchResult>> {
        let start = Instant::now();

        let decoded = self.decoder.decode(path, None)?;
        let landmarks = extract_channels(&self.extractor, &decoded.channels);

        let mut query_pairs: HashMap<Hash, u32> = HashMap::new();
        for (hash, offset) in &landmarks {
            query_pairs.insert(*hash, *offset);
        }
        let total_query_hashes = landmarks.len();

        let hash_set = query_pairs.keys().copied().collect();
        let postings = self.store.lookup(&hash_set).await?;

        let Some(alignment) = self.matcher.align(&postings, &query_pairs, total_query_hashes)
        else {
            return Ok(None);
        };

        if alignment.relative_confidence <= ACCEPT_RELATIVE_CONFIDENCE
            || alignment.confidence <= ACCEPT_CONFIDENCE
        {
            return Ok(None);
        }

        let Some(clip) = self.store.get_clip(alignment.clip_id).await? else {
            return Ok(None);
        };
        let tags = self.store.get_tags(alignment.clip_id).await?;

        if let Some(expected) = expected_tag_id {
            if !tags.contains(&expected) {
                return Ok(None);
            }
        }

        let match_time = round_to(start.elapsed().as_secs_f64(), 2);

        Ok(Some(MatchResult {
            clip_id: clip.clip_id,
            clip_name: clip.name,
            confidence: alignment.confidence,
            relative_confidence: round_to(alignment.relative_confidence, 2),
            match_time,
            offset: alignment.offset,
            offset_seconds: alignment.offset_seconds,
            content_digest: to_hex(&clip.content_digest),
            duration: clip.duration,
            tags,
        }))
    }

    /// Recognizes every file under `path` matching `extensions`,
    /// draining the whole worker pool before returning. The Python
    /// original's early-`return` inside its result loop is unreachable
    /// dead code and is not reproduced here.
    pub async fn recognize_directory(
        &self,
        path: &Path,
        extensions: &[&str],
    ) -> Result<Vec<(std::path::PathBuf, Option<MatchResult>)>> {
        let files = list_files(path, extensions);
        let mut results = Vec::with_capacity(files.len());

        for file in files {
            let result = self.recognize(&file).await?;
            results.push((file, result));
        }

        Ok(results)
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn list_files(root: &Path, extensions: &[&str]) -> Vec<std::path::PathBuf> {
    let wanted: std::collections::HashSet<String> =
        extensions.iter().map(|e| e.to_lowercase()).collect();
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if wanted.contains(&ext.to_lowercase()) {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_to_matches_expected_precision() {
        assert_eq!(round_to(3.14159, 2), 3.14);
        assert_eq!(round_to(0.123456, 5), 0.12346);
    }
}
