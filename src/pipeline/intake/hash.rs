use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::IntakeError;

const CHUNK_SIZE: usize = 64 * 1024;

/// CRC-32 over the full file content, as 8 lower-case hex digits.
pub fn crc32_for_file(path: &Path) -> Result<String, IntakeError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:08x}", hasher.finalize()))
}

/// SHA-256 over the extracted text followed by the original file bytes.
///
/// Binds what was read off the page to the exact bytes that get stamped.
pub fn metadata_hash(text: &str, file_bytes: &[u8]) -> String {
    let mut digest = Sha256::new();
    digest.update(text.as_bytes());
    digest.update(file_bytes);
    format!("{:x}", digest.finalize())
}
