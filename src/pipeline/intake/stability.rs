use std::path::Path;
use std::time::Duration;

use super::IntakeError;

/// Check that a file is no longer being written.
///
/// Samples the size, blocks the calling thread for `wait`, and samples again.
/// A large file that happens to stall for the whole interval reads as stable;
/// a file still growing reads as unstable and is left for the next sweep.
pub fn is_stable(path: &Path, wait: Duration) -> Result<bool, IntakeError> {
    let before = std::fs::metadata(path)?.len();
    std::thread::sleep(wait);
    let after = std::fs::metadata(path)?.len();
    Ok(before == after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unchanged_file_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4 finished").unwrap();
        assert!(is_stable(&path, Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn growing_file_is_unstable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4 partial").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .unwrap();
            file.write_all(b" more bytes arriving").unwrap();
        });

        let stable = is_stable(&path, Duration::from_millis(400)).unwrap();
        writer.join().unwrap();
        assert!(!stable);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = is_stable(&dir.path().join("gone.pdf"), Duration::ZERO);
        assert!(matches!(result, Err(IntakeError::Io(_))));
    }
}
