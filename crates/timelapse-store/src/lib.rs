//! Directory-backed frame store.
//!
//! Every frame lives in its own `<timestamp>.jpg` file; the directory listing
//! is the only index. Writes go through a temp file and a rename so readers
//! never observe a partially written frame.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use sha2::{Digest, Sha256};
use timelapse_types::{frame::FrameId, Result, TimelapseError};
use tracing::{debug, warn};

/// A concurrent `clear()` may remove the directory between creation and write.
const WRITE_ATTEMPTS: usize = 3;
const LATEST_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct FrameStore {
    dir: PathBuf,
    quality: u8,
    max_frames: usize,
}

impl FrameStore {
    pub fn new(dir: impl Into<PathBuf>, quality: u8, max_frames: usize) -> Self {
        Self {
            dir: dir.into(),
            quality: quality.clamp(1, 100),
            max_frames,
        }
    }

    /// Store rooted at `<data_dir>/<sha256(image_url)>`.
    pub fn for_source(data_dir: &Path, image_url: &str, quality: u8, max_frames: usize) -> Self {
        Self::new(data_dir.join(source_dir_name(image_url)), quality, max_frames)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, id: FrameId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Decodes `bytes`, re-encodes them as RGB JPEG and stores the result
    /// under `id`, then trims the store back to its frame cap.
    pub fn append(&self, id: FrameId, bytes: &[u8]) -> Result<PathBuf> {
        let encoded = normalize_jpeg(bytes, self.quality)?;
        let path = self.write_atomic(id, &encoded)?;
        debug!("Stored frame {:?}", path);
        self.evict_to_cap(self.max_frames)?;
        Ok(path)
    }

    fn write_atomic(&self, id: FrameId, data: &[u8]) -> Result<PathBuf> {
        let target = self.frame_path(id);
        let temp = self.dir.join(format!(".{}.tmp", id.file_name()));
        let mut attempt = 0;
        loop {
            attempt += 1;
            fs::create_dir_all(&self.dir).map_err(|err| {
                store_error(format!("failed to create {}: {err}", self.dir.display()))
            })?;
            match fs::write(&temp, data).and_then(|_| fs::rename(&temp, &target)) {
                Ok(()) => return Ok(target),
                Err(err) if err.kind() == io::ErrorKind::NotFound && attempt < WRITE_ATTEMPTS => {
                    warn!(
                        "Frame directory {} vanished during write; recreating",
                        self.dir.display()
                    );
                }
                Err(err) => {
                    let _ = fs::remove_file(&temp);
                    return Err(store_error(format!(
                        "failed to write {}: {err}",
                        target.display()
                    )));
                }
            }
        }
    }

    /// All stored frames, oldest first. A missing directory is an empty store.
    pub fn list_ordered(&self) -> Result<Vec<FrameId>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(store_error(format!(
                    "failed to list {}: {err}",
                    self.dir.display()
                )))
            }
        };
        let mut ids: Vec<FrameId> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| FrameId::from_path(&entry.path()))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn frame_count(&self) -> Result<usize> {
        Ok(self.list_ordered()?.len())
    }

    pub fn read_frame(&self, id: FrameId) -> Result<Vec<u8>> {
        read_frame_file(&self.frame_path(id), id)
    }

    /// Bytes of the newest frame, or `None` for an empty store.
    pub fn latest(&self) -> Result<Option<Vec<u8>>> {
        for _ in 0..LATEST_ATTEMPTS {
            let Some(newest) = self.list_ordered()?.pop() else {
                return Ok(None);
            };
            match self.read_frame(newest) {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(TimelapseError::MissingFrame(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Deletes the oldest frames until at most `max_count` remain.
    pub fn evict_to_cap(&self, max_count: usize) -> Result<usize> {
        let ids = self.list_ordered()?;
        let excess = ids.len().saturating_sub(max_count);
        for id in &ids[..excess] {
            self.remove_frame(*id)?;
        }
        if excess > 0 {
            debug!("Evicted {} frame(s) over cap {}", excess, max_count);
        }
        Ok(excess)
    }

    /// Deletes frames captured before `now - max_age`. A frame exactly on the
    /// boundary is kept.
    pub fn evict_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp().saturating_sub(max_age_secs);
        let mut removed = 0;
        for id in self.list_ordered()? {
            if id.timestamp() >= cutoff {
                break;
            }
            self.remove_frame(id)?;
            removed += 1;
        }
        if removed > 0 {
            debug!("Evicted {} frame(s) older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    fn remove_frame(&self, id: FrameId) -> Result<()> {
        match fs::remove_file(self.frame_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(store_error(format!("failed to delete frame {id}: {err}"))),
        }
    }

    /// Removes the whole directory tree; it is recreated by the next append.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(store_error(format!(
                "failed to clear {}: {err}",
                self.dir.display()
            ))),
        }
    }
}

/// Reads one frame file, mapping a vanished file to `MissingFrame`.
pub fn read_frame_file(path: &Path, id: FrameId) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => TimelapseError::MissingFrame(id),
        _ => store_error(format!("failed to read {}: {err}", path.display())),
    })
}

/// Decodes any supported image payload and re-encodes it as RGB JPEG.
pub fn normalize_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>> {
    let image = image::load_from_memory(bytes)
        .map_err(|err| TimelapseError::Decode(format!("unable to identify image file: {err}")))?;
    let rgb = image.to_rgb8();
    let mut encoded = Vec::with_capacity(bytes.len());
    JpegEncoder::new_with_quality(&mut encoded, quality)
        .encode_image(&rgb)
        .map_err(|err| store_error(format!("failed to encode jpeg: {err}")))?;
    Ok(encoded)
}

/// Stable directory name for a source URL.
pub fn source_dir_name(image_url: &str) -> String {
    hex::encode(Sha256::digest(image_url.as_bytes()))
}

pub fn store_error(message: impl Into<String>) -> TimelapseError {
    TimelapseError::StoreIo(message.into())
}
