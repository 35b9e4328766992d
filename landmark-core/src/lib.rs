#![deny(missing_docs)]

//! # landmark-core
//!
//! `landmark-core` implements a landmark-based audio fingerprinting and
//! recognition engine, in the style of Shazam's constellation-pair
//! algorithm. Given a corpus of reference audio clips, it builds a
//! compact, searchable index of spectral landmarks. Given a query audio
//! stream, it identifies which indexed clip (if any) is playing, with
//! what confidence, and at what temporal offset.
//!
//! The crate exposes four central pieces:
//!
//! 1. [`extract::Extractor`]: turns PCM samples into a set of
//!    `(hash, offset)` landmark pairs.
//! 2. [`store::Store`]: a narrow trait for persisting clips and hash
//!    postings, implemented for MySQL and PostgreSQL.
//! 3. [`ingest::Ingestor`]: coordinates decoding + extraction + storage
//!    for a corpus of reference clips.
//! 4. [`matcher::Matcher`] and [`recognize::Engine`]: recover the best
//!    matching clip for a query, with a confidence score and an offset.

/// Configuration loaded at startup.
pub mod config;
/// Audio decoding contract and the `ffmpeg`-backed implementation.
pub mod decode;
/// Spectrogram peak-picking and constellation-pair fingerprint extraction.
pub mod extract;
/// SHA-1 content hashing, used for clip dedup.
pub mod hash;
/// Parallel corpus ingestion.
pub mod ingest;
/// Offset-histogram matching over query hash sets.
pub mod matcher;
/// The `recognize` facade tying decode/extract/match together.
pub mod recognize;
/// Index store trait and backend implementations.
pub mod store;

use std::path::PathBuf;

/// Common error type for `landmark-core`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A file could not be decoded into PCM samples.
    #[error("decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    /// The index store returned a transport, constraint, or transaction
    /// failure.
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
    /// Configuration was missing or unparseable. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),
    /// Configuration file could not be loaded or parsed.
    #[error("config error: {0}")]
    ConfigLoad(#[from] config::ConfigError),
    /// Wraps [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A path that was expected to exist does not.
    #[error("path does not exist: {0:?}")]
    PathNotFound(PathBuf),
}

/// Common result type for `landmark-core`.
pub type Result<T> = std::result::Result<T, Error>;
