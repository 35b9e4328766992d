//! Spectrogram peak-picking and constellation-pair fingerprint extraction
//! (§4.1-§4.3).
//!
//! The extractor turns a single channel of PCM samples into a set of
//! `(hash, offset)` landmarks:
//!
//! 1. Slide a windowed FFT across the signal to build a magnitude
//!    spectrogram.
//! 2. Pick local maxima ("peaks") in the spectrogram above a fixed
//!    amplitude floor, using a 2D neighborhood maximum filter.
//! 3. Pair each peak ("anchor") with up to [`FAN_OUT`] later peaks
//!    ("targets") within a bounded time-delta window, forming a
//!    constellation.
//! 4. Hash each anchor/target pair down to a fixed-width fingerprint.
//!
//! FFT, windowing, and peak extraction follow the same window → FFT →
//! magnitude spectrum → peak extraction → hash shape as
//! `arunnats-alakazam`'s `fingerprinter-rust` crate, adapted to the
//! fixed constellation-pair geometry this engine requires instead of
//! frequency-band peak picking.

use std::collections::{HashSet, VecDeque};

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use sha1::{Digest, Sha1};

/// Sample rate assumed by the extractor. The decoder resamples every
/// input to this rate before extraction ever sees it.
pub const SAMPLE_RATE: u32 = 44_100;

/// FFT window size, in samples.
pub const WINDOW_SIZE: usize = 4096;

/// Window overlap fraction between consecutive frames.
pub const OVERLAP: f32 = 0.5;

/// Hop size between consecutive FFT frames, in samples.
pub const HOP: usize = (WINDOW_SIZE as f32 * (1.0 - OVERLAP)) as usize;

/// Minimum magnitude (dB-like scale) for a bin to be eligible as a peak.
pub const A_MIN: f32 = 10.0;

/// Half-width of the square neighborhood a peak must dominate, in bins.
pub const NEIGHBORHOOD: usize = 20;

/// Maximum number of target peaks paired with each anchor peak.
pub const FAN_OUT: usize = 15;

/// Minimum time delta (in spectrogram frames) between anchor and target.
pub const MIN_DT: i64 = 0;

/// Maximum time delta (in spectrogram frames) between anchor and target.
pub const MAX_DT: i64 = 200;

/// Width, in bytes, of a truncated fingerprint hash.
pub const FINGERPRINT_REDUCTION: usize = 10;

/// A truncated SHA-1 fingerprint hash: [`FINGERPRINT_REDUCTION`] bytes,
/// rendered as 20 uppercase hex characters at the API boundary.
pub type Hash = [u8; FINGERPRINT_REDUCTION];

/// A single spectrogram peak.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Peak {
    /// FFT bin index (frequency axis).
    freq_bin: usize,
    /// Spectrogram frame index (time axis).
    time_bin: usize,
}

/// Extracts constellation-pair landmarks from decoded PCM audio.
///
/// An `Extractor` owns the FFT plan, so callers processing many clips
/// should keep one instance around rather than rebuilding the plan per
/// file.
pub struct Extractor {
    fft: std::sync::Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
}

impl Extractor {
    /// Builds an extractor using the fixed [`WINDOW_SIZE`] FFT.
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(WINDOW_SIZE);
        let window = hann_window(WINDOW_SIZE);
        Self { fft, window }
    }

    /// Extracts the landmark set for a single channel of samples.
    ///
    /// Returns `(hash, offset)` pairs, where `offset` is the anchor
    /// peak's spectrogram frame index. Multi-channel audio is handled
    /// by calling this once per channel and unioning the results (see
    /// [`extract_channels`]).
    pub fn extract(&self, samples: &[i16]) -> HashSet<(Hash, u32)> {
        let spectrogram = self.spectrogram(samples);
        let peaks = pick_peaks(&spectrogram);
        hash_constellation(&peaks)
    }

    /// Computes the magnitude spectrogram: one row of [`WINDOW_SIZE`]/2
    /// magnitudes per hop-spaced frame.
    fn spectrogram(&self, samples: &[i16]) -> Vec<Vec<f32>> {
        if samples.len() < WINDOW_SIZE {
            return Vec::new();
        }

        let frame_count = (samples.len() - WINDOW_SIZE) / HOP + 1;
        let mut frames = Vec::with_capacity(frame_count);

        for frame_idx in 0..frame_count {
            let start = frame_idx * HOP;
            let slice = &samples[start..start + WINDOW_SIZE];

            let mut buffer: Vec<Complex<f32>> = slice
                .iter()
                .zip(&self.window)
                .map(|(&s, &w)| Complex::new(s as f32 / i16::MAX as f32 * w, 0.0))
                .collect();

            self.fft.process(&mut buffer);

            let magnitudes = buffer
                .iter()
                .take(WINDOW_SIZE / 2)
                .map(|c| c.norm().max(1e-9).ln() * 10.0)
                .collect();

            frames.push(magnitudes);
        }

        frames
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts and unions landmarks across all channels of decoded audio.
///
/// Channels are independent, so this is parallelized across `rayon`
/// when the `rayon` feature is enabled; the output set is
/// order-insensitive downstream so there is no correctness reason to
/// keep channels sequential.
pub fn extract_channels(extractor: &Extractor, channels: &[Vec<i16>]) -> HashSet<(Hash, u32)> {
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        channels
            .par_iter()
            .map(|samples| extractor.extract(samples))
            .reduce(HashSet::new, |mut acc, set| {
                acc.extend(set);
                acc
            })
    }

    #[cfg(not(feature = "rayon"))]
    {
        channels.iter().fold(HashSet::new(), |mut acc, samples| {
            acc.extend(extractor.extract(samples));
            acc
        })
    }
}

/// Builds a periodic Hann window of length `n`.
fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos())
        })
        .collect()
}

/// Picks local maxima in `spectrogram` that dominate their
/// [`NEIGHBORHOOD`] and clear the [`A_MIN`] floor.
///
/// A bin is a peak iff it equals the maximum of its square neighborhood
/// (time and frequency). The neighborhood max is computed with a
/// separable sliding-window maximum filter: a 1D max pass along the
/// frequency axis of each row, followed by a 1D max pass along the time
/// axis of each column. This is exact for a square footprint and runs
/// in O(rows * cols) via a monotonic deque per axis, instead of the
/// naive O(rows * cols * neighborhood^2).
fn pick_peaks(spectrogram: &[Vec<f32>]) -> Vec<Peak> {
    if spectrogram.is_empty() {
        return Vec::new();
    }

    let time_bins = spectrogram.len();
    let freq_bins = spectrogram[0].len();
    let radius = NEIGHBORHOOD / 2;

    // Pass 1: sliding max along the frequency axis, row by row.
    let mut row_max = vec![vec![0.0f32; freq_bins]; time_bins];
    for t in 0..time_bins {
        sliding_max_1d(&spectrogram[t], radius, &mut row_max[t]);
    }

    // Pass 2: sliding max along the time axis, column by column.
    let mut neighborhood_max = vec![vec![0.0f32; freq_bins]; time_bins];
    let mut column = vec![0.0f32; time_bins];
    let mut column_max = vec![0.0f32; time_bins];
    for f in 0..freq_bins {
        for t in 0..time_bins {
            column[t] = row_max[t][f];
        }
        sliding_max_1d(&column, radius, &mut column_max);
        for t in 0..time_bins {
            neighborhood_max[t][f] = column_max[t];
        }
    }

    let mut peaks = Vec::new();
    for t in 0..time_bins {
        for f in 0..freq_bins {
            let value = spectrogram[t][f];
            if value >= A_MIN && value >= neighborhood_max[t][f] {
                peaks.push(Peak {
                    freq_bin: f,
                    time_bin: t,
                });
            }
        }
    }

    peaks.sort_by_key(|p| (p.time_bin, p.freq_bin));
    peaks
}

/// Sliding-window maximum over `input` with window radius `radius`
/// (window width `2 * radius + 1`, clipped at the array edges).
///
/// Uses a monotonic decreasing deque of indices: each index is pushed
/// once and popped at most once, so the whole pass is O(n).
fn sliding_max_1d(input: &[f32], radius: usize, output: &mut [f32]) {
    let n = input.len();
    let mut deque: VecDeque<usize> = VecDeque::new();

    for i in 0..n + radius {
        if i < n {
            while let Some(&back) = deque.back() {
                if input[back] <= input[i] {
                    deque.pop_back();
                } else {
                    break;
                }
            }
            deque.push_back(i);
        }

        if let Some(&front) = deque.front() {
            if front + radius < i {
                deque.pop_front();
            }
        }

        if i >= radius {
            let center = i - radius;
            if let Some(&front) = deque.front() {
                output[center] = input[front];
            }
        }
    }
}

/// Pairs each peak with up to [`FAN_OUT`] later peaks within
/// `[MIN_DT, MAX_DT]` frames and hashes each pair.
///
/// Returns `(hash, anchor_offset)`, matching the spec's offset
/// convention: the anchor peak's time bin is what gets stored and
/// later compared against the query's anchor offsets.
fn hash_constellation(peaks: &[Peak]) -> HashSet<(Hash, u32)> {
    let mut out = HashSet::new();

    for (i, anchor) in peaks.iter().enumerate() {
        let mut paired = 0;
        for target in &peaks[i + 1..] {
            if paired >= FAN_OUT {
                break;
            }
            let dt = target.time_bin as i64 - anchor.time_bin as i64;
            if dt < MIN_DT {
                continue;
            }
            if dt > MAX_DT {
                break;
            }
            out.insert((pair_hash(anchor, target, dt), anchor.time_bin as u32));
            paired += 1;
        }
    }

    out
}

/// Hashes an anchor/target pair down to [`FINGERPRINT_REDUCTION`] bytes
/// of SHA-1 over `"f1|f2|dt"`.
fn pair_hash(anchor: &Peak, target: &Peak, dt: i64) -> Hash {
    let input = format!("{}|{}|{}", anchor.freq_bin, target.freq_bin, dt);
    let digest = Sha1::digest(input.as_bytes());
    let mut hash = [0u8; FINGERPRINT_REDUCTION];
    hash.copy_from_slice(&digest[..FINGERPRINT_REDUCTION]);
    hash
}

/// Renders a [`Hash`] as the 20-char uppercase hex string used at the
/// API and storage boundary.
pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode_upper(hash)
}

/// Parses a 20-char hex string back into a [`Hash`].
pub fn hash_from_hex(s: &str) -> Result<Hash, hex::FromHexError> {
    let bytes = hex::decode(s)?;
    let mut hash = [0u8; FINGERPRINT_REDUCTION];
    if bytes.len() != FINGERPRINT_REDUCTION {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    hash.copy_from_slice(&bytes);
    Ok(hash)
}
