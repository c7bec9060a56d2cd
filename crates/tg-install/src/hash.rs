//! Content digests of artifact binaries (BLAKE2s-256, lowercase hex).

use blake2::{Blake2s256, Digest};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size for hashing
const CHUNK_SIZE: usize = 64 * 1024;

/// Computes content digests of files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashVerifier;

impl HashVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Digest the file at `path`.
    ///
    /// Blocking; call from a blocking worker.
    pub fn digest_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Blake2s256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Compare two files by content.
    ///
    /// Any read failure counts as a mismatch.
    pub fn same_content(&self, a: &Path, b: &Path) -> bool {
        match (self.digest_file(a), self.digest_file(b)) {
            (Ok(da), Ok(db)) => da == db,
            _ => false,
        }
    }
}
