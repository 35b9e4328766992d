//! End-to-end ingest -> recognize round trip against an in-memory
//! `Store` and a fake `Decoder`, exercising the real `Ingestor` and
//! `Engine` facades without a real database or real audio files.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use landmark_core::decode::{DecodeError, DecodedAudio, Decoder};
use landmark_core::extract::{extract_channels, Extractor, Hash, SAMPLE_RATE};
use landmark_core::hash::content_digest;
use landmark_core::ingest::Ingestor;
use landmark_core::recognize::Engine;
use landmark_core::store::{Clip, HashPosting, Store, StoreError};

#[derive(Default)]
struct MemoryStore {
    clips: Mutex<HashMap<i64, Clip>>,
    postings: Mutex<Vec<HashPosting>>,
    tags: Mutex<HashMap<i64, Vec<i64>>>,
    next_id: Mutex<i64>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_clip(
        &self,
        name: &str,
        content_digest: &[u8; 20],
        duration: f64,
        owner_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut next_id = self.next_id.lock().await;
        *next_id += 1;
        let clip_id = *next_id;

        self.clips.lock().await.insert(
            clip_id,
            Clip {
                clip_id,
                name: name.to_string(),
                content_digest: *content_digest,
                duration,
                fingerprinted: false,
                owner_id,
            },
        );
        Ok(clip_id)
    }

    async fn insert_tags(&self, clip_id: i64, tag_ids: &[i64]) -> Result<(), StoreError> {
        self.tags
            .lock()
            .await
            .entry(clip_id)
            .or_default()
            .extend(tag_ids.iter().copied());
        Ok(())
    }

    async fn insert_hashes(&self, clip_id: i64, pairs: &[(Hash, u32)]) -> Result<(), StoreError> {
        let mut postings = self.postings.lock().await;
        for (hash, offset) in pairs {
            postings.push(HashPosting {
                hash: *hash,
                clip_id,
                offset: *offset,
            });
        }
        Ok(())
    }

    async fn mark_fingerprinted(&self, clip_id: i64) -> Result<(), StoreError> {
        if let Some(clip) = self.clips.lock().await.get_mut(&clip_id) {
            clip.fingerprinted = true;
        }
        Ok(())
    }

    async fn lookup(&self, hashes: &HashSet<Hash>) -> Result<Vec<HashPosting>, StoreError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .postings
            .lock()
            .await
            .iter()
            .filter(|p| hashes.contains(&p.hash))
            .copied()
            .collect())
    }

    async fn list_clip_digests(&self) -> Result<HashSet<[u8; 20]>, StoreError> {
        Ok(self
            .clips
            .lock()
            .await
            .values()
            .filter(|c| c.fingerprinted)
            .map(|c| c.content_digest)
            .collect())
    }

    async fn get_clip(&self, clip_id: i64) -> Result<Option<Clip>, StoreError> {
        Ok(self.clips.lock().await.get(&clip_id).cloned())
    }

    async fn get_tags(&self, clip_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self.tags.lock().await.get(&clip_id).cloned().unwrap_or_default())
    }

    async fn delete_unfingerprinted(&self) -> Result<(), StoreError> {
        self.clips.lock().await.retain(|_, c| c.fingerprinted);
        Ok(())
    }
}

/// A [`Decoder`] that returns precomputed PCM for known paths instead of
/// touching `ffmpeg-next`. Content digests are still computed for real,
/// over whatever bytes the test wrote to that path, so dedup behaves
/// exactly as it would against real files.
#[derive(Default)]
struct FakeDecoder {
    clips: HashMap<PathBuf, (Vec<i16>, f64)>,
}

impl FakeDecoder {
    fn with_clip(mut self, path: &Path, samples: Vec<i16>, duration_seconds: f64) -> Self {
        self.clips.insert(path.to_path_buf(), (samples, duration_seconds));
        self
    }
}

impl Decoder for FakeDecoder {
    fn decode(
        &self,
        path: &Path,
        limit_seconds: Option<f64>,
    ) -> landmark_core::decode::Result<DecodedAudio> {
        let (samples, duration_seconds) = self
            .clips
            .get(path)
            .cloned()
            .ok_or_else(|| DecodeError::Unsupported(format!("no fake audio for {}", path.display())))?;

        let mut channel = samples;
        if let Some(limit) = limit_seconds {
            if limit > 0.0 {
                channel.truncate((limit * SAMPLE_RATE as f64) as usize);
            }
        }

        Ok(DecodedAudio {
            channels: vec![channel],
            sample_rate: SAMPLE_RATE,
            content_digest: content_digest(path).map_err(DecodeError::Io)?,
            duration_seconds,
        })
    }
}

fn sine_wave(freq_hz: f32, seconds: f32, sample_rate: u32) -> Vec<i16> {
    let n = (sample_rate as f32 * seconds) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * freq_hz * t).sin() * i16::MAX as f32 * 0.8) as i16
        })
        .collect()
}

/// Writes distinct placeholder bytes to a fresh temp path so `content_digest`
/// sees real, distinct file contents per registered clip. The bytes carry
/// no audio -- the `FakeDecoder` supplies the PCM out of band.
fn placeholder_file(name: &str, seed: u8) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "landmark-core-roundtrip-{}-{}-{}",
        std::process::id(),
        name,
        seed
    ));
    std::fs::write(&path, [seed; 64]).unwrap();
    path
}

#[tokio::test]
async fn ingesting_a_clip_then_recognizing_it_finds_a_match() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let reference_path = placeholder_file("self-match", 1);
    let tone = sine_wave(1200.0, 5.0, SAMPLE_RATE);

    let decoder: Arc<dyn Decoder> =
        Arc::new(FakeDecoder::default().with_clip(&reference_path, tone.clone(), 5.0));

    let ingestor = Ingestor::with_decoder(store.clone(), None, decoder.clone());
    let clip_id = ingestor
        .ingest_file(&reference_path, None, &[])
        .await
        .expect("ingest should succeed");

    let engine = Engine::with_decoder(store, decoder);
    let result = engine
        .recognize(&reference_path)
        .await
        .unwrap()
        .expect("the exact reference tone should be recognized");

    assert_eq!(result.clip_id, clip_id);
    assert_eq!(result.offset, 0);

    std::fs::remove_file(&reference_path).ok();
}

#[tokio::test]
async fn a_time_shifted_query_reports_a_proportional_offset() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let reference_path = placeholder_file("shift-reference", 2);
    let query_path = placeholder_file("shift-query", 3);

    let full_tone = sine_wave(900.0, 10.0, SAMPLE_RATE);
    let shift_seconds = 2.0f32;
    let shift_samples = (shift_seconds * SAMPLE_RATE as f32) as usize;
    let shifted_query = full_tone[shift_samples..].to_vec();

    let decoder: Arc<dyn Decoder> = Arc::new(
        FakeDecoder::default()
            .with_clip(&reference_path, full_tone, 10.0)
            .with_clip(&query_path, shifted_query, 8.0),
    );

    let ingestor = Ingestor::with_decoder(store.clone(), None, decoder.clone());
    ingestor.ingest_file(&reference_path, None, &[]).await.unwrap();

    let engine = Engine::with_decoder(store, decoder);
    let result = engine
        .recognize(&query_path)
        .await
        .unwrap()
        .expect("a contiguous sub-range of the reference should match");

    assert!(
        (result.offset_seconds - shift_seconds as f64).abs() < 0.05,
        "expected offset near {shift_seconds}s, got {}",
        result.offset_seconds
    );

    std::fs::remove_file(&reference_path).ok();
    std::fs::remove_file(&query_path).ok();
}

#[tokio::test]
async fn an_unrelated_query_is_not_recognized() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let reference_path = placeholder_file("negative-reference", 4);
    let query_path = placeholder_file("negative-query", 5);

    let decoder: Arc<dyn Decoder> = Arc::new(
        FakeDecoder::default()
            .with_clip(&reference_path, sine_wave(1200.0, 5.0, SAMPLE_RATE), 5.0)
            .with_clip(&query_path, white_noise(5.0, SAMPLE_RATE, 7), 5.0),
    );

    let ingestor = Ingestor::with_decoder(store.clone(), None, decoder.clone());
    ingestor.ingest_file(&reference_path, None, &[]).await.unwrap();

    let engine = Engine::with_decoder(store, decoder);
    let result = engine.recognize(&query_path).await.unwrap();
    assert!(result.is_none(), "unrelated audio should not match anything");

    std::fs::remove_file(&reference_path).ok();
    std::fs::remove_file(&query_path).ok();
}

#[tokio::test]
async fn ingesting_the_same_content_twice_is_deduplicated() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let path = placeholder_file("dedup", 6);
    let tone = sine_wave(1000.0, 5.0, SAMPLE_RATE);

    let decoder: Arc<dyn Decoder> = Arc::new(FakeDecoder::default().with_clip(&path, tone, 5.0));
    let ingestor = Ingestor::with_decoder(store.clone(), None, decoder);

    ingestor.ingest_file(&path, None, &[]).await.unwrap();
    let second = ingestor.ingest_file(&path, None, &[]).await;
    assert!(second.is_err(), "re-ingesting the same content should be rejected");

    assert_eq!(store.list_clip_digests().await.unwrap().len(), 1);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn clips_never_fingerprinted_are_removed_on_startup() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let crashed_clip = store
        .insert_clip("half-written", &[9u8; 20], 1.0, None)
        .await
        .unwrap();
    assert!(store.get_clip(crashed_clip).await.unwrap().is_some());

    let ingestor = Ingestor::with_decoder(store.clone(), None, Arc::new(FakeDecoder::default()));
    ingestor.delete_unfingerprinted().await.unwrap();

    assert!(store.get_clip(crashed_clip).await.unwrap().is_none());
}

#[tokio::test]
async fn recognition_disambiguates_between_multiple_ingested_clips() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
    let path_a = placeholder_file("multi-a", 10);
    let path_b = placeholder_file("multi-b", 11);
    let query_path = placeholder_file("multi-query", 12);

    let tone_a = sine_wave(600.0, 5.0, SAMPLE_RATE);
    let tone_b = sine_wave(1500.0, 5.0, SAMPLE_RATE);

    let decoder: Arc<dyn Decoder> = Arc::new(
        FakeDecoder::default()
            .with_clip(&path_a, tone_a.clone(), 5.0)
            .with_clip(&path_b, tone_b, 5.0)
            .with_clip(&query_path, tone_a, 5.0),
    );

    let ingestor = Ingestor::with_decoder(store.clone(), None, decoder.clone());
    let clip_a = ingestor.ingest_file(&path_a, None, &[]).await.unwrap();
    ingestor.ingest_file(&path_b, None, &[]).await.unwrap();

    let engine = Engine::with_decoder(store, decoder);
    let result = engine
        .recognize(&query_path)
        .await
        .unwrap()
        .expect("query should match clip a, not clip b");
    assert_eq!(result.clip_id, clip_a);

    std::fs::remove_file(&path_a).ok();
    std::fs::remove_file(&path_b).ok();
    std::fs::remove_file(&query_path).ok();
}

fn white_noise(seconds: f32, sample_rate: u32, seed: u64) -> Vec<i16> {
    let n = (sample_rate as f32 * seconds) as usize;
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..n)
        .map(|_| {
            // xorshift64*, deterministic and dependency-free.
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            let r = state.wrapping_mul(0x2545F4914F6CDD1D);
            ((r >> 48) as i16).saturating_sub(i16::MAX / 2)
        })
        .collect()
}

#[tokio::test]
async fn extractor_round_trip_still_aligns_via_the_matcher_directly() {
    // Keeps direct matcher-level coverage alongside the facade tests above:
    // confirms the offset-histogram itself (not just the Engine wrapper)
    // aligns an exact repeat of the reference tone at delta zero.
    let extractor = Extractor::new();
    let reference = sine_wave(1200.0, 5.0, SAMPLE_RATE);
    let landmarks: Vec<_> =
        extract_channels(&extractor, &[reference.clone()]).into_iter().collect();
    assert!(!landmarks.is_empty(), "reference clip should yield landmarks");

    let query_landmarks = extract_channels(&extractor, &[reference]);
    let query_pairs: HashMap<Hash, u32> = query_landmarks.into_iter().collect();

    let postings: Vec<HashPosting> = landmarks
        .iter()
        .map(|(hash, offset)| HashPosting {
            hash: *hash,
            clip_id: 1,
            offset: *offset,
        })
        .collect();

    let matcher = landmark_core::matcher::Matcher::new();
    let alignment = matcher
        .align(&postings, &query_pairs, query_pairs.len())
        .expect("identical tones should align");
    assert_eq!(alignment.clip_id, 1);
    assert_eq!(alignment.offset, 0);
}

#[test]
fn content_digest_is_independent_of_read_chunking() {
    let dir = std::env::temp_dir().join(format!(
        "landmark-core-roundtrip-test-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("sample.bin");
    std::fs::write(&path, vec![0xAAu8; 5_000_000]).unwrap();

    let d1 = content_digest(&path).unwrap();
    let d2 = content_digest(&path).unwrap();
    assert_eq!(d1, d2);

    std::fs::remove_dir_all(&dir).ok();
}
