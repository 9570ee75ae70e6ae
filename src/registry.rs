//! Clip registry
//! Owns the persisted clip list and serializes every rewrite of config.json

use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::PickerConfig;
use crate::error::PickerResult;
use crate::types::{ClipId, ClipRecord};

pub struct ClipRegistry {
    path: PathBuf,
    document: Mutex<PickerConfig>,
}

impl ClipRegistry {
    /// Load the registry document from disk
    pub fn load(path: impl Into<PathBuf>) -> PickerResult<Self> {
        let path = path.into();
        let document = PickerConfig::load(&path)?;
        info!(
            "Loaded {} clips from {}",
            document.clips.len(),
            path.display()
        );
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// Load the registry, writing a default document first if none exists
    pub fn load_or_create(path: impl Into<PathBuf>) -> PickerResult<Self> {
        let path = path.into();
        if !path.exists() {
            let document = PickerConfig::default();
            write_atomic(&path, &document.to_json()?)?;
            info!("Created default config at {}", path.display());
        }
        Self::load(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn document(&self) -> MutexGuard<'_, PickerConfig> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, id: &ClipId) -> bool {
        self.document().clips.iter().any(|clip| &clip.id == id)
    }

    pub fn clips(&self) -> Vec<ClipRecord> {
        self.document().clips.clone()
    }

    pub fn ffmpeg_path(&self) -> String {
        self.document().ffmpeg_path.clone()
    }

    pub fn split_sub_lines(&self) -> bool {
        self.document().split_sub_lines
    }

    /// Image sequence pattern for a clip, e.g. `images/ep0112500000000-%06d.png`
    pub fn output_pattern(&self, id: &ClipId) -> PathBuf {
        let document = self.document();
        Path::new(&document.image_root).join(format!("{}-%06d{}", id, document.image_extension))
    }

    /// Append a clip and rewrite the document.
    ///
    /// Returns `Ok(false)` when a clip with the same id is already stored. If the
    /// rewrite fails the record stays in memory and the previous file is left intact.
    pub fn append(&self, record: ClipRecord) -> PickerResult<bool> {
        let mut document = self.document();
        if document.clips.iter().any(|clip| clip.id == record.id) {
            return Ok(false);
        }

        let id = record.id.clone();
        document.clips.push(record);

        // Lock stays held through the write so rewrites never interleave
        let json = document.to_json()?;
        write_atomic(&self.path, &json)?;
        info!("Wrote clip {} to {}", id, self.path.display());
        Ok(true)
    }

    /// Copy the current document to a timestamped sibling file
    pub fn backup(&self) -> PickerResult<PathBuf> {
        let _document = self.document();
        let stamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S%.6f");
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".bak-{}", stamp));
        let backup = PathBuf::from(backup);

        fs::copy(&self.path, &backup)?;
        info!("Backed up {} to {}", self.path.display(), backup.display());
        Ok(backup)
    }
}

/// Write to a temporary sibling, then rename over the target
fn write_atomic(path: &Path, content: &str) -> PickerResult<()> {
    let mut temp = path.to_path_buf().into_os_string();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    if let Err(e) = fs::write(&temp, content) {
        warn!("Failed to write temporary file {}: {}", temp.display(), e);
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&temp, path) {
        fs::remove_file(&temp).ok();
        return Err(e.into());
    }

    Ok(())
}
