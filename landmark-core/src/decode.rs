//! Decoder adapter (§4.1).
//!
//! Produces per-channel 16-bit PCM sample arrays and a sample rate from a
//! file path. This module is a thin contract boundary: the matching core
//! (extractor, index, matcher) never depends on `ffmpeg-next` or `hound`
//! directly, only on [`DecodedAudio`].
//!
//! `ffmpeg-next` handles the bulk of container/codec support (WAV, MP3,
//! MP4/AAC, FLAC, OGG, ...). A small number of 24-bit WAV files are
//! rejected by `ffmpeg-next`'s resampler; for those we fall back to
//! `hound`, which reads WAV PCM directly and never needs to resample.

use std::path::Path;

use crate::hash::{self, Digest20};

/// Errors produced while decoding a file into PCM.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// Wraps [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Wraps [`ffmpeg_next::Error`].
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
    /// Wraps [`hound::Error`].
    #[error("WAV decode error: {0}")]
    Hound(#[from] hound::Error),
    /// The file has no audio stream, or its format is unsupported.
    #[error("unsupported or audio-less file: {0}")]
    Unsupported(String),
}

/// Result type for decode operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// The output of decoding one audio file: one 16-bit PCM sample array per
/// channel (all channels the same length), plus metadata needed by the
/// rest of the pipeline.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// One sample array per channel, in interleave order (channel 0,
    /// channel 1, ...).
    pub channels: Vec<Vec<i16>>,
    /// Sample rate, in Hz, of `channels`.
    pub sample_rate: u32,
    /// Uppercase hex-renderable SHA-1 of the raw file bytes.
    pub content_digest: Digest20,
    /// Duration of the decoded audio, in seconds.
    pub duration_seconds: f64,
}

/// Decodes a file path into PCM, behind a trait so the ingestor and
/// recognizer can be driven by a fake decoder in tests without touching
/// `ffmpeg-next` or the filesystem's audio codecs at all.
pub trait Decoder: Send + Sync {
    /// Decodes `path`, as documented on the free function [`decode`].
    fn decode(&self, path: &Path, limit_seconds: Option<f64>) -> Result<DecodedAudio>;
}

/// The production [`Decoder`]: `ffmpeg-next`, with the `hound` WAV
/// fallback described at the module level.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegDecoder;

impl Decoder for FfmpegDecoder {
    fn decode(&self, path: &Path, limit_seconds: Option<f64>) -> Result<DecodedAudio> {
        decode(path, limit_seconds)
    }
}

/// Decodes `path` into PCM, optionally limited to the first
/// `limit_seconds` seconds of audio.
///
/// `limit_seconds`, if `Some` and positive, truncates each channel to
/// `limit_seconds * sample_rate` samples. `None` (or a non-positive
/// value) means "no limit" (§6: `fingerprint_limit` of `-1` or absent).
pub fn decode(path: impl AsRef<Path>, limit_seconds: Option<f64>) -> Result<DecodedAudio> {
    let path = path.as_ref();
    let content_digest = hash::content_digest(path)?;

    match decode_with_ffmpeg(path, limit_seconds) {
        Ok((channels, sample_rate, duration_seconds)) => Ok(DecodedAudio {
            channels,
            sample_rate,
            content_digest,
            duration_seconds,
        }),
        Err(ffmpeg_err) => {
            let is_wav = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
            if !is_wav {
                return Err(ffmpeg_err);
            }

            tracing::debug!(
                path = %path.display(),
                error = %ffmpeg_err,
                "ffmpeg decode failed for WAV, falling back to hound"
            );

            let (channels, sample_rate, duration_seconds) =
                decode_wav_with_hound(path, limit_seconds)?;
            Ok(DecodedAudio {
                channels,
                sample_rate,
                content_digest,
                duration_seconds,
            })
        }
    }
}

fn apply_limit(channels: &mut [Vec<i16>], sample_rate: u32, limit_seconds: Option<f64>) {
    let Some(limit_seconds) = limit_seconds else {
        return;
    };
    if limit_seconds <= 0.0 {
        return;
    }
    let max_samples = (limit_seconds * sample_rate as f64) as usize;
    for channel in channels.iter_mut() {
        channel.truncate(max_samples);
    }
}

fn decode_with_ffmpeg(
    path: &Path,
    limit_seconds: Option<f64>,
) -> Result<(Vec<Vec<i16>>, u32, f64)> {
    let mut ctx = ffmpeg_next::format::input(&path)?;
    let stream = ctx
        .streams()
        .best(ffmpeg_next::media::Type::Audio)
        .ok_or_else(|| DecodeError::Unsupported("no audio stream found".to_string()))?;
    let stream_idx = stream.index();
    let time_base = stream.time_base();

    let decoder_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
    let mut decoder = decoder_ctx.decoder().audio()?;

    let channel_count = decoder.channels().max(1) as usize;
    let sample_rate = crate::extract::SAMPLE_RATE;

    let mut resampler = decoder.resampler(
        ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed),
        decoder.channel_layout(),
        sample_rate,
    )?;

    let mut channels: Vec<Vec<i16>> = vec![Vec::new(); channel_count];
    let mut frame = ffmpeg_next::frame::Audio::empty();
    let mut resampled = ffmpeg_next::frame::Audio::empty();

    let packets = ctx
        .packets()
        .filter(|(s, _)| s.index() == stream_idx)
        .map(|(_, p)| p);

    for packet in packets {
        decoder.send_packet(&packet)?;
        while decoder.receive_frame(&mut frame).is_ok() {
            let mut delay = resampler.run(&frame, &mut resampled)?;
            loop {
                let samples = resampled.samples();
                let raw = &resampled.data(0)[..samples * channel_count * 2];
                // SAFETY: we asked the resampler for packed S16 output above, so
                // `raw` is guaranteed to contain `i16` samples in native endianness.
                let (_, pcm, _) = unsafe { raw.align_to::<i16>() };
                for chunk in pcm.chunks_exact(channel_count) {
                    for (c, &sample) in chunk.iter().enumerate() {
                        channels[c].push(sample);
                    }
                }

                if delay.is_none() {
                    break;
                }
                delay = resampler.flush(&mut resampled)?;
            }
        }
    }

    let duration_raw = if stream.duration() >= 0 {
        stream.duration()
    } else {
        ctx.duration() / 1000
    };
    let duration_seconds = duration_raw as f64 * f64::from(time_base);

    apply_limit(&mut channels, sample_rate, limit_seconds);

    Ok((channels, sample_rate, duration_seconds))
}

fn decode_wav_with_hound(
    path: &Path,
    limit_seconds: Option<f64>,
) -> Result<(Vec<Vec<i16>>, u32, f64)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channel_count = spec.channels as usize;

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => reader.samples::<i16>().collect::<std::result::Result<_, _>>()?,
            24 | 32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> (spec.bits_per_sample - 16)) as i16))
                .collect::<std::result::Result<_, _>>()?,
            8 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| ((v - 128) << 8) as i16))
                .collect::<std::result::Result<_, _>>()?,
            other => {
                return Err(DecodeError::Unsupported(format!(
                    "unsupported WAV bit depth: {other}"
                )))
            }
        },
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()?,
    };

    let total_frames = samples.len() / channel_count;
    let mut channels: Vec<Vec<i16>> = vec![Vec::with_capacity(total_frames); channel_count];
    for frame in samples.chunks_exact(channel_count) {
        for (c, &sample) in frame.iter().enumerate() {
            channels[c].push(sample);
        }
    }

    let duration_seconds = total_frames as f64 / sample_rate as f64;
    apply_limit(&mut channels, sample_rate, limit_seconds);

    Ok((channels, sample_rate, duration_seconds))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn apply_limit_truncates_each_channel() {
        let mut channels = vec![vec![0i16; 1000], vec![0i16; 1000]];
        apply_limit(&mut channels, 100, Some(2.0));
        assert_eq!(channels[0].len(), 200);
        assert_eq!(channels[1].len(), 200);
    }

    #[test]
    fn apply_limit_noop_when_absent_or_nonpositive() {
        let mut channels = vec![vec![0i16; 50]];
        apply_limit(&mut channels, 100, None);
        assert_eq!(channels[0].len(), 50);
        apply_limit(&mut channels, 100, Some(-1.0));
        assert_eq!(channels[0].len(), 50);
    }
}
