use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::IntakeError;

#[cfg(unix)]
const CROSS_DEVICE_LINK: i32 = 18;

/// Create `dir` (and parents) if missing and set 0o755 on unix.
///
/// An existing directory keeps its mode, so owner-only personal folders
/// stay owner-only when files are moved into them.
pub fn ensure_directory(dir: &Path) -> Result<(), IntakeError> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    restrict_permissions(dir, 0o755);
    Ok(())
}

/// Create the personal-storage root and today's `YYYYMMDD` subfolder
/// (UTC), both owner-only. Returns the subfolder.
pub fn ensure_personal_directory(
    root: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, IntakeError> {
    std::fs::create_dir_all(root)?;
    restrict_permissions(root, 0o700);
    let day = root.join(now.format("%Y%m%d").to_string());
    std::fs::create_dir_all(&day)?;
    restrict_permissions(&day, 0o700);
    Ok(day)
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode)) {
        tracing::warn!(
            dir = %dir.display(),
            mode = %format!("{mode:o}"),
            error = %e,
            "Could not set directory permissions"
        );
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path, _mode: u32) {}

/// Move `src` into `dest_dir`, keeping its file name.
pub fn relocate(src: &Path, dest_dir: &Path) -> Result<PathBuf, IntakeError> {
    let name = file_name_of(src)?;
    relocate_as(src, dest_dir, &name)
}

/// Move `src` into `dest_dir` under `name`, replacing any file already there.
pub fn relocate_as(src: &Path, dest_dir: &Path, name: &str) -> Result<PathBuf, IntakeError> {
    ensure_directory(dest_dir)?;
    let dest = dest_dir.join(name);
    move_file(src, &dest)?;
    Ok(dest)
}

/// Move `src` into a holding directory without overwriting: on a name
/// collision, `_1`, `_2`, ... is appended to the stem.
pub fn relocate_unique(src: &Path, dest_dir: &Path) -> Result<PathBuf, IntakeError> {
    let name = file_name_of(src)?;
    ensure_directory(dest_dir)?;
    let dest = unique_destination(dest_dir, &name);
    move_file(src, &dest)?;
    Ok(dest)
}

/// First free path for `name` in `dir`.
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let ext = as_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn file_name_of(path: &Path) -> Result<String, IntakeError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| IntakeError::MissingFileName(path.to_path_buf()))
}

/// Rename, falling back to copy-then-delete across filesystems.
fn move_file(src: &Path, dest: &Path) -> Result<(), IntakeError> {
    match std::fs::rename(src, dest) {
        Ok(()) => {}
        Err(e) if is_cross_device(&e) => {
            tracing::warn!(
                from = %src.display(),
                to = %dest.display(),
                "Rename crossed filesystems, copying instead"
            );
            std::fs::copy(src, dest).map_err(|source| relocation_error(src, dest, source))?;
            std::fs::remove_file(src).map_err(|source| relocation_error(src, dest, source))?;
        }
        Err(source) => return Err(relocation_error(src, dest, source)),
    }
    tracing::debug!(from = %src.display(), to = %dest.display(), "File relocated");
    Ok(())
}

fn relocation_error(src: &Path, dest: &Path, source: std::io::Error) -> IntakeError {
    IntakeError::Relocation {
        from: src.to_path_buf(),
        to: dest.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(CROSS_DEVICE_LINK)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &std::io::Error) -> bool {
    false
}
