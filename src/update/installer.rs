use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::build_server::{ArtifactLocation, BuildSource};
use crate::error::{Result, UpdateError};

/// Owns the installation directory while it is being replaced.
///
/// Between `clear_installation` and a finished `fetch_and_unpack` the
/// directory does not exist; a crash in that window leaves no app installed.
#[derive(Debug, Clone)]
pub struct Installer {
    /// Directory wiped before every install
    pub install_dir: PathBuf,
    /// Archive entries are extracted relative to this
    pub extract_root: PathBuf,
    /// Downloaded archives land here and are never removed
    pub download_dir: PathBuf,
    pub artifact_name: String,
}

impl Installer {
    /// Remove the installation directory. Absence is not an error.
    pub fn clear_installation(&self) -> Result<()> {
        clear_installation(&self.install_dir)
    }

    /// Local file name for a build's archive, e.g. `sharey_build_105.zip`.
    pub fn archive_path(&self, location: &ArtifactLocation) -> PathBuf {
        self.download_dir
            .join(format!("{}_build_{}.zip", self.artifact_name, location.build))
    }

    /// Download the artifact and extract it. Returns the archive path, which
    /// is left on disk.
    pub fn fetch_and_unpack(
        &self,
        source: &impl BuildSource,
        location: &ArtifactLocation,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.download_dir).map_err(|e| {
            UpdateError::Download(format!(
                "failed to create {}: {}",
                self.download_dir.display(),
                e
            ))
        })?;

        let archive = self.archive_path(location);
        source.download(location, &archive)?;
        unpack_archive(&archive, &self.extract_root)?;
        Ok(archive)
    }
}

pub fn clear_installation(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed installation");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdateError::Installation(format!(
            "failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Check the launch target was unpacked and give it the execute bit.
///
/// Archives built on Windows carry no Unix mode bits, so the binary would
/// otherwise come out as 0644.
pub fn mark_executable(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| {
        UpdateError::Installation(format!("{} missing after unpack: {}", path.display(), e))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = metadata.permissions();
        if perms.mode() & 0o111 == 0 {
            perms.set_mode(0o755);
            fs::set_permissions(path, perms).map_err(|e| {
                UpdateError::Installation(format!(
                    "failed to make {} executable: {}",
                    path.display(),
                    e
                ))
            })?;
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}

/// Extract every entry of the zip at `archive_path` under `dest_dir`.
pub fn unpack_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| {
        UpdateError::CorruptArchive(format!("failed to open {}: {}", archive_path.display(), e))
    })?;
    let mut archive = zip::ZipArchive::new(file)?;

    fs::create_dir_all(dest_dir).map_err(|e| {
        UpdateError::CorruptArchive(format!("failed to create {}: {}", dest_dir.display(), e))
    })?;
    archive.extract(dest_dir)?;

    tracing::debug!(
        entries = archive.len(),
        dest = %dest_dir.display(),
        "extracted archive"
    );
    Ok(())
}
