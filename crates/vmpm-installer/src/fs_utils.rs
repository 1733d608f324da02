use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};

/// Removes a file or symlink; a missing entry is not an error.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => {
            fs::remove_file(path)?;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Writes `bytes` next to `path` and renames it into place, so readers see
/// either the old content or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let part_path = path.with_file_name(format!(
        ".{}.part",
        path.file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("vmpm")
    ));

    if let Err(err) = fs::write(&part_path, bytes) {
        let _ = fs::remove_file(&part_path);
        return Err(err).with_context(|| format!("failed to write {}", part_path.display()));
    }
    if let Err(err) = fs::rename(&part_path, path) {
        let _ = fs::remove_file(&part_path);
        return Err(err).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                part_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}

#[cfg(unix)]
pub fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
