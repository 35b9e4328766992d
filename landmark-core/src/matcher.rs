//! Offset-histogram matching over query hash sets (§4.5).
//!
//! Given the query's landmark hashes and the reference postings that
//! share those hashes, the matcher aligns query and reference by the
//! offset delta that the most postings agree on. This is the same
//! histogram-of-deltas technique as the Python original's
//! `Tramscore.align_matches` (not carried file-for-file, since no
//! example repo implements it, but grounded in the Python original's
//! algorithm described in `tramscore/__init__.py` and reproduced
//! verbatim in the base specification).

use std::collections::HashMap;

use crate::extract::{Hash, HOP};
use crate::store::HashPosting;

/// Result of a single alignment: the best-aligning clip and how
/// confidently it aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// Matched clip identifier.
    pub clip_id: i64,
    /// Raw count of hashes that agreed on this alignment.
    pub confidence: u32,
    /// `100 * confidence / total_query_hashes`.
    pub relative_confidence: f64,
    /// Frame offset of the alignment (`ref_offset - query_offset`).
    pub offset: i64,
    /// Same offset, in seconds.
    pub offset_seconds: f64,
}

/// Aligns reference postings against a query's hash-to-offset map.
///
/// The matcher is stateless and reentrant: the same instance may be
/// shared across concurrent recognitions.
#[derive(Default)]
pub struct Matcher;

impl Matcher {
    /// Builds a new, stateless matcher.
    pub fn new() -> Self {
        Self
    }

    /// Runs the alignment histogram over `postings` for the given
    /// `query_pairs` (hash -> query offset) and `total_query_hashes`
    /// (the pre-dedup count, used as the relative-confidence
    /// denominator).
    ///
    /// Returns `None` if `postings` is empty.
    pub fn align(
        &self,
        postings: &[HashPosting],
        query_pairs: &HashMap<Hash, u32>,
        total_query_hashes: usize,
    ) -> Option<Alignment> {
        if postings.is_empty() {
            return None;
        }

        let mut histogram: HashMap<(i64, i64), u32> = HashMap::new();

        let mut best_key: Option<(i64, i64)> = None;
        let mut best_count = 0u32;

        // The winner only changes when a key strictly exceeds the
        // current max, matching `align_matches`'s `count > largest_count`
        // check. A later key that merely ties the leader never takes
        // over, regardless of where either key first appeared.
        for posting in postings {
            let Some(&query_offset) = query_pairs.get(&posting.hash) else {
                continue;
            };
            let delta = posting.offset as i64 - query_offset as i64;
            let key = (delta, posting.clip_id);

            let count = histogram.entry(key).or_insert(0);
            *count += 1;

            if *count > best_count {
                best_count = *count;
                best_key = Some(key);
            }
        }

        let (delta, clip_id) = best_key?;
        // Left unrounded: the accept-threshold check in `recognize` needs
        // the exact ratio, not a value already snapped to 2dp.
        let relative_confidence = 100.0 * best_count as f64 / total_query_hashes.max(1) as f64;
        let offset_seconds =
            round_to(delta as f64 * HOP as f64 / crate::extract::SAMPLE_RATE as f64, 5);

        Some(Alignment {
            clip_id,
            confidence: best_count,
            relative_confidence,
            offset: delta,
            offset_seconds,
        })
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extract::FINGERPRINT_REDUCTION;

    fn posting(hash: Hash, clip_id: i64, offset: u32) -> HashPosting {
        HashPosting {
            hash,
            clip_id,
            offset,
        }
    }

    #[test]
    fn no_postings_means_no_match() {
        let matcher = Matcher::new();
        let query_pairs = HashMap::new();
        assert!(matcher.align(&[], &query_pairs, 0).is_none());
    }

    #[test]
    fn argmax_picks_the_most_agreed_delta() {
        let matcher = Matcher::new();
        let h1 = [1u8; FINGERPRINT_REDUCTION];
        let h2 = [2u8; FINGERPRINT_REDUCTION];
        let h3 = [3u8; FINGERPRINT_REDUCTION];

        let mut query_pairs = HashMap::new();
        query_pairs.insert(h1, 10);
        query_pairs.insert(h2, 20);
        query_pairs.insert(h3, 30);

        // Clip 1 aligns all three at delta=100; clip 2 aligns only one.
        let postings = vec![
            posting(h1, 1, 110),
            posting(h2, 1, 120),
            posting(h3, 1, 130),
            posting(h1, 2, 500),
        ];

        let alignment = matcher.align(&postings, &query_pairs, 3).unwrap();
        assert_eq!(alignment.clip_id, 1);
        assert_eq!(alignment.confidence, 3);
        assert!((alignment.relative_confidence - 100.0).abs() < 1e-9);
        assert_eq!(alignment.offset, 100);
    }

    #[test]
    fn a_tie_never_hands_the_lead_back_to_an_earlier_key() {
        let matcher = Matcher::new();
        let h = [1u8; FINGERPRINT_REDUCTION];

        let mut query_pairs = HashMap::new();
        query_pairs.insert(h, 0);

        // Arrival order Y, X, X, X, Y, Y: Y takes the lead at count 1,
        // X strictly overtakes it at count 2 and again at count 3, then
        // Y only ties X's count of 3 -- X must stay the winner.
        let postings = vec![
            posting(h, 9, 10),
            posting(h, 5, 10),
            posting(h, 5, 10),
            posting(h, 5, 10),
            posting(h, 9, 10),
            posting(h, 9, 10),
        ];

        let alignment = matcher.align(&postings, &query_pairs, 6).unwrap();
        assert_eq!(alignment.clip_id, 5);
        assert_eq!(alignment.confidence, 3);
    }
}
