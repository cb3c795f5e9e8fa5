//! Uploaded video staging.
//!
//! An upload is copied byte-for-byte into a fixed staging path and then read
//! back through `FileSource`. Uploads from stdin skip the extension check.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::file::{FileConfig, FileSource};
use super::synthetic;

/// Container extensions accepted for uploads.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

/// Marker for "read the upload from stdin".
pub const STDIN_UPLOAD: &str = "-";

#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Where the upload is staged (e.g. "uploaded_video.mp4").
    pub staging_path: PathBuf,
}

/// Copy `reader` into `staging_path`, replacing any previous upload.
///
/// Bytes go to a sibling `.partial` file that is renamed over the staging
/// path once complete. The reader may be the staged file itself; a failed or
/// empty upload leaves the previous one in place.
pub fn stage_upload<R: Read>(reader: &mut R, staging_path: &Path) -> Result<u64> {
    if let Some(parent) = staging_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create staging directory {}", parent.display()))?;
    }
    let partial = partial_path(staging_path)?;
    let copied = copy_into(reader, &partial).and_then(|bytes| match bytes {
        0 => Err(anyhow!("uploaded video is empty")),
        n => Ok(n),
    });
    let bytes = match copied {
        Ok(bytes) => bytes,
        Err(err) => {
            if let Err(cleanup) = std::fs::remove_file(&partial) {
                log::warn!("upload: could not remove {}: {}", partial.display(), cleanup);
            }
            return Err(err);
        }
    };
    std::fs::rename(&partial, staging_path).with_context(|| {
        format!(
            "move {} into place at {}",
            partial.display(),
            staging_path.display()
        )
    })?;
    log::info!(
        "upload: staged {} bytes at {}",
        bytes,
        staging_path.display()
    );
    Ok(bytes)
}

fn partial_path(staging_path: &Path) -> Result<PathBuf> {
    let mut name = staging_path
        .file_name()
        .ok_or_else(|| anyhow!("staging path {} has no file name", staging_path.display()))?
        .to_os_string();
    name.push(".partial");
    Ok(staging_path.with_file_name(name))
}

fn copy_into<R: Read>(reader: &mut R, target: &Path) -> Result<u64> {
    let mut out = File::create(target)
        .with_context(|| format!("create staging file {}", target.display()))?;
    io::copy(reader, &mut out).with_context(|| format!("write upload to {}", target.display()))
}

/// Check the upload's extension against `ACCEPTED_EXTENSIONS`.
pub fn validate_upload_name(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| anyhow!("upload {} has no file extension", path.display()))?;
    if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(anyhow!(
            "upload {} has unsupported type '{}' (accepted: {})",
            path.display(),
            ext,
            ACCEPTED_EXTENSIONS.join(", ")
        ))
    }
}

/// Stage `input` (a path, `-` for stdin, or a `stub://` clip) and open it.
pub fn open_upload(input: &str, config: &UploadConfig) -> Result<FileSource> {
    if synthetic::is_stub(input) {
        return FileSource::new(FileConfig {
            path: input.to_string(),
        });
    }

    if input == STDIN_UPLOAD {
        stage_upload(&mut io::stdin().lock(), &config.staging_path)?;
    } else {
        let path = Path::new(input);
        validate_upload_name(path)?;
        let mut file =
            File::open(path).with_context(|| format!("open upload {}", path.display()))?;
        stage_upload(&mut file, &config.staging_path)?;
    }

    let staged = config
        .staging_path
        .to_str()
        .ok_or_else(|| anyhow!("staging path is not valid UTF-8"))?;
    FileSource::new(FileConfig {
        path: staged.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_video_extensions() {
        assert!(validate_upload_name(Path::new("clip.mp4")).is_ok());
        assert!(validate_upload_name(Path::new("clip.MOV")).is_ok());
        assert!(validate_upload_name(Path::new("clip.avi")).is_ok());
        assert!(validate_upload_name(Path::new("clip.mkv")).is_err());
        assert!(validate_upload_name(Path::new("clip")).is_err());
    }

    #[test]
    fn staging_replaces_previous_upload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = dir.path().join("uploads").join("uploaded_video.mp4");

        stage_upload(&mut &b"first upload"[..], &staging)?;
        let bytes = stage_upload(&mut &b"second"[..], &staging)?;

        assert_eq!(bytes, 6);
        assert_eq!(std::fs::read(&staging)?, b"second");
        Ok(())
    }

    #[test]
    fn empty_upload_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = dir.path().join("uploaded_video.mp4");
        assert!(stage_upload(&mut &b""[..], &staging).is_err());
        assert!(!staging.exists());
        Ok(())
    }

    #[test]
    fn empty_upload_keeps_previous_staging() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = dir.path().join("uploaded_video.mp4");
        stage_upload(&mut &b"earlier clip"[..], &staging)?;

        assert!(stage_upload(&mut &b""[..], &staging).is_err());
        assert_eq!(std::fs::read(&staging)?, b"earlier clip");
        assert!(!dir.path().join("uploaded_video.mp4.partial").exists());
        Ok(())
    }

    #[test]
    fn restaging_the_staged_file_keeps_its_bytes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = dir.path().join("uploaded_video.mp4");
        std::fs::write(&staging, b"site camera clip")?;

        for alias in [staging.clone(), dir.path().join(".").join("uploaded_video.mp4")] {
            let mut file = File::open(&alias)?;
            let bytes = stage_upload(&mut file, &staging)?;
            assert_eq!(bytes, 16);
            assert_eq!(std::fs::read(&staging)?, b"site camera clip");
        }
        Ok(())
    }
}
