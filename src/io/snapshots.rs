//! Annotated snapshot persistence and retention
//!
//! Saved images are what the HA camera entity serves (base64 over MQTT), so
//! file names carry the plate and score for quick eyeballing:
//! `XYZ999_92%_drive_2026-08-07_10-15-00_<uuid>.png`

use anyhow::Context;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: &str) -> Self {
        info!(snapshot_dir = %dir, "snapshot_writer_initialized");
        Self { dir: PathBuf::from(dir) }
    }

    /// Write image bytes to the snapshot directory, returning the path
    pub fn save(
        &self,
        camera: &str,
        plate: Option<(&str, f64)>,
        image: &[u8],
    ) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create snapshot dir {}", self.dir.display()))?;

        let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let suffix = format!("{camera}_{timestamp}_{}.png", Uuid::now_v7());
        let name = match plate {
            Some((plate, score)) => {
                format!("{}_{}%_{suffix}", plate.to_uppercase(), (score * 100.0) as i64)
            }
            None => suffix,
        };

        let path = self.dir.join(name);
        fs::write(&path, image)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        info!(path = %path.display(), bytes = %image.len(), "snapshot_saved");
        Ok(path)
    }

    /// Delete snapshots older than the retention window, returning how many
    /// were removed. Files that cannot be inspected or removed are skipped.
    pub fn prune_older_than(&self, retention: Duration) -> anyhow::Result<usize> {
        let cutoff = SystemTime::now() - retention;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            // Nothing saved yet
            Err(_) => return Ok(0),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if modified < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "snapshot_pruned");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "snapshot_prune_failed"),
                }
            }
        }

        if removed > 0 {
            info!(removed = %removed, "snapshot_retention_sweep");
        }
        Ok(removed)
    }

    #[cfg(test)]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_with_plate_name() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().to_str().unwrap());

        let path = writer.save("drive", Some(("xyz999", 0.92)), b"jpegdata").unwrap();

        assert!(path.exists());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("XYZ999_92%_drive_"));
        assert!(name.ends_with(".png"));
        assert_eq!(fs::read(&path).unwrap(), b"jpegdata");
    }

    #[test]
    fn test_save_without_plate_name() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().to_str().unwrap());

        let path = writer.save("drive", None, b"jpegdata").unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("drive_"));
    }

    #[test]
    fn test_save_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("plates").join("snaps");
        let writer = SnapshotWriter::new(nested.to_str().unwrap());

        writer.save("drive", None, b"jpegdata").unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn test_prune_removes_only_old_files() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().to_str().unwrap());
        writer.save("drive", None, b"jpegdata").unwrap();

        // Fresh file survives a generous retention window
        let removed = writer.prune_older_than(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(fs::read_dir(writer.dir()).unwrap().count(), 1);

        // Zero retention removes everything written before the sweep
        std::thread::sleep(Duration::from_millis(20));
        let removed = writer.prune_older_than(Duration::from_secs(0)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(fs::read_dir(writer.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_prune_missing_directory() {
        let writer = SnapshotWriter::new("/nonexistent/snapshots");
        assert_eq!(writer.prune_older_than(Duration::from_secs(60)).unwrap(), 0);
    }
}
