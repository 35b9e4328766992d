//! Content hashing for clip dedup (§3, §9).
//!
//! A clip's content digest is the uppercase hexadecimal SHA-1 of its raw
//! file bytes, computed in fixed-size chunks so arbitrarily large files
//! can be hashed without loading them entirely into memory.

use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

/// Size of the read buffer used when hashing a file.
const BLOCK_SIZE: usize = 1 << 20;

/// A 20-byte SHA-1 content digest.
pub type Digest20 = [u8; 20];

/// Computes the SHA-1 content digest of the file at `path`.
///
/// This reads the file in `BLOCK_SIZE` chunks, so it works for files much
/// larger than available memory.
pub fn content_digest(path: impl AsRef<Path>) -> std::io::Result<Digest20> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; BLOCK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    Ok(digest.into())
}

/// Renders a digest as uppercase hexadecimal.
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode_upper(digest)
}

/// Parses an uppercase (or lowercase) hex digest back into raw bytes.
pub fn from_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn digest_is_deterministic_and_matches_known_vector() {
        let path = tempfile_with_contents(b"hello world");
        let d1 = content_digest(&path).unwrap();
        let d2 = content_digest(&path).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(
            to_hex(&d1),
            "2AAE6C35C94FCFB415DBE95F408B9CE91EE846ED"
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn hex_round_trips() {
        let digest = [0xABu8; 20];
        let hex = to_hex(&digest);
        assert_eq!(hex, "AB".repeat(20));
        assert_eq!(from_hex(&hex).unwrap(), digest.to_vec());
    }

    fn tempfile_with_contents(contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "landmark-core-hash-test-{}-{}",
            std::process::id(),
            contents.len()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }
}
