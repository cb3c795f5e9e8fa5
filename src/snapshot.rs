//! Violation snapshots.
//!
//! `SnapshotWriter` owns the snapshot counter. Each saved snapshot is a PNG
//! named `no_helmet_<n>.png` plus one JSON line in `manifest.jsonl` carrying
//! the triggering detection and the SHA-256 of the encoded image.

use std::fs::{self, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::detect::{BoundingBox, Detection, HardhatClass};
use crate::frame::Frame;

pub const SNAPSHOT_PREFIX: &str = "no_helmet_";
pub const SNAPSHOT_EXTENSION: &str = "png";
pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// When a violating frame produces snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// One snapshot per violating detection.
    #[default]
    PerDetection,
    /// At most one snapshot per frame.
    PerFrame,
}

/// Manifest line for one saved snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct SnapshotRecord {
    pub file: String,
    pub number: u64,
    pub frame_index: u64,
    pub class: HardhatClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub sha256: String,
    pub unix_secs: u64,
}

pub struct SnapshotWriter {
    dir: PathBuf,
    next_number: u64,
}

impl SnapshotWriter {
    /// Create the snapshot directory if needed.
    ///
    /// With `resume` set, numbering continues after the highest existing
    /// snapshot in `dir`; otherwise it starts at zero.
    pub fn open<P: AsRef<Path>>(dir: P, resume: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
        let highest = if resume { highest_existing(&dir)? } else { None };
        let next_number = match highest {
            Some(highest) => highest.checked_add(1).ok_or_else(|| {
                anyhow!(
                    "snapshot numbering exhausted in {}: remove {}{}.{}",
                    dir.display(),
                    SNAPSHOT_PREFIX,
                    highest,
                    SNAPSHOT_EXTENSION
                )
            })?,
            None => 0,
        };
        if next_number > 0 {
            log::info!(
                "snapshots: resuming numbering at {} in {}",
                next_number,
                dir.display()
            );
        }
        Ok(Self {
            dir,
            next_number,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number the next snapshot will carry.
    pub fn next_number(&self) -> u64 {
        self.next_number
    }

    pub fn path_for(&self, number: u64) -> PathBuf {
        self.dir
            .join(format!("{SNAPSHOT_PREFIX}{number}.{SNAPSHOT_EXTENSION}"))
    }

    /// Encode `frame` as PNG, write it under the next number and append the
    /// manifest line. The counter only advances once the file is written.
    pub fn save(&mut self, frame: &Frame, detection: &Detection) -> Result<SnapshotRecord> {
        let number = self.next_number;
        let following = number
            .checked_add(1)
            .ok_or_else(|| anyhow!("snapshot numbering exhausted in {}", self.dir.display()))?;
        let path = self.path_for(number);

        let mut png = Vec::new();
        frame
            .to_rgb_image()?
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("encode snapshot PNG")?;
        fs::write(&path, &png)
            .with_context(|| format!("write snapshot {}", path.display()))?;

        self.next_number = following;

        let record = SnapshotRecord {
            file: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            number,
            frame_index: frame.index(),
            class: detection.class,
            confidence: detection.display_confidence(),
            bbox: detection.bbox,
            sha256: hex::encode(Sha256::digest(&png)),
            unix_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        self.append_manifest(&record)?;
        log::info!(
            "snapshot {} saved (frame {}, {} {:.2})",
            path.display(),
            frame.index(),
            detection.class.label(),
            record.confidence
        );
        Ok(record)
    }

    fn append_manifest(&self, record: &SnapshotRecord) -> Result<()> {
        let path = self.dir.join(MANIFEST_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open snapshot manifest {}", path.display()))?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line)
            .with_context(|| format!("append snapshot manifest {}", path.display()))?;
        Ok(())
    }
}

/// Parse `no_helmet_<n>.png` into `n`.
pub fn parse_snapshot_number(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

fn highest_existing(dir: &Path) -> Result<Option<u64>> {
    let mut highest = None;
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(n) = name.to_str().and_then(parse_snapshot_number) {
            highest = Some(highest.map_or(n, |h: u64| h.max(n)));
        }
    }
    Ok(highest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Bgr;

    fn violation() -> Detection {
        Detection::new(BoundingBox::new(1, 1, 4, 4), HardhatClass::NoHardhat, 0.91)
    }

    #[test]
    fn parses_only_snapshot_names() {
        assert_eq!(parse_snapshot_number("no_helmet_0.png"), Some(0));
        assert_eq!(parse_snapshot_number("no_helmet_42.png"), Some(42));
        assert_eq!(parse_snapshot_number("no_helmet_x.png"), None);
        assert_eq!(parse_snapshot_number("no_helmet_3png"), None);
        assert_eq!(parse_snapshot_number("manifest.jsonl"), None);
    }

    #[test]
    fn save_writes_png_and_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SnapshotWriter::open(dir.path(), true)?;
        let frame = Frame::filled(8, 8, Bgr::RED, 3)?;

        let record = writer.save(&frame, &violation())?;
        assert_eq!(record.file, "no_helmet_0.png");
        assert_eq!(record.frame_index, 3);
        assert_eq!(record.sha256.len(), 64);
        assert_eq!(writer.next_number(), 1);

        let decoded = image::open(dir.path().join("no_helmet_0.png"))?.to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 0, 0]);

        let manifest = fs::read_to_string(dir.path().join(MANIFEST_FILE))?;
        let line: serde_json::Value = serde_json::from_str(manifest.trim())?;
        assert_eq!(line["class"], "NO-Hardhat");
        assert_eq!(line["number"], 0);
        Ok(())
    }

    #[test]
    fn resume_continues_after_highest_existing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("no_helmet_4.png"), b"x")?;
        fs::write(dir.path().join("no_helmet_11.png"), b"x")?;

        assert_eq!(SnapshotWriter::open(dir.path(), true)?.next_number(), 12);
        assert_eq!(SnapshotWriter::open(dir.path(), false)?.next_number(), 0);
        Ok(())
    }

    #[test]
    fn resume_refuses_to_wrap_numbering() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("no_helmet_0.png"), b"evidence")?;
        fs::write(dir.path().join(format!("no_helmet_{}.png", u64::MAX)), b"x")?;

        let err = SnapshotWriter::open(dir.path(), true).err().context("open should fail")?;
        assert!(err.to_string().contains("numbering exhausted"));
        assert_eq!(fs::read(dir.path().join("no_helmet_0.png"))?, b"evidence");
        // Without resuming the stray file is irrelevant.
        assert_eq!(SnapshotWriter::open(dir.path(), false)?.next_number(), 0);
        Ok(())
    }

    #[test]
    fn last_number_is_never_written() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(format!("no_helmet_{}.png", u64::MAX - 1)), b"x")?;
        let mut writer = SnapshotWriter::open(dir.path(), true)?;
        assert_eq!(writer.next_number(), u64::MAX);

        let frame = Frame::filled(8, 8, Bgr::BLACK, 0)?;
        assert!(writer.save(&frame, &violation()).is_err());
        assert!(!writer.path_for(u64::MAX).exists());
        Ok(())
    }
}
