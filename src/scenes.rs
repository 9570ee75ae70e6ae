//! Scene boundary resolution
//! Reads the per-video scene document (`<video>.json`) and finds the scene around a position

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PickerError, PickerResult};

/// Scene document produced by ffprobe's frame dump
#[derive(Debug, Deserialize)]
struct SceneDocument {
    frames: Vec<SceneFrame>,
}

#[derive(Debug, Deserialize)]
struct SceneFrame {
    pkt_pts_time: Timestamp,
}

/// ffprobe writes timestamps as strings; hand-written files often use numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Seconds(f64),
    Text(String),
}

impl Timestamp {
    fn seconds(&self) -> PickerResult<f64> {
        match self {
            Timestamp::Seconds(secs) => Ok(*secs),
            Timestamp::Text(text) => text.trim().parse().map_err(|_| {
                PickerError::Config(format!("Invalid scene timestamp: {:?}", text))
            }),
        }
    }
}

/// Strictly increasing scene start times for one video
#[derive(Debug, Clone, PartialEq)]
pub struct SceneBoundaries {
    starts: Vec<Duration>,
}

impl SceneBoundaries {
    pub fn new(seconds: &[f64]) -> PickerResult<Self> {
        if seconds.is_empty() {
            return Err(PickerError::Config(
                "Scene document contains no boundaries".to_string(),
            ));
        }

        let mut starts: Vec<Duration> = Vec::with_capacity(seconds.len());
        for (i, &secs) in seconds.iter().enumerate() {
            let start = Duration::try_from_secs_f64(secs).map_err(|_| {
                PickerError::Config(format!(
                    "Scene boundary {} is not a valid time: {}",
                    i, secs
                ))
            })?;
            if let Some(prev) = starts.last() {
                if start <= *prev {
                    return Err(PickerError::Config(format!(
                        "Scene boundaries must be strictly increasing ({:.3}s follows {:.3}s)",
                        secs,
                        prev.as_secs_f64()
                    )));
                }
            }
            starts.push(start);
        }

        Ok(Self { starts })
    }

    pub fn from_json(content: &str) -> PickerResult<Self> {
        let document: SceneDocument = serde_json::from_str(content)
            .map_err(|e| PickerError::Config(format!("Failed to parse scene document: {}", e)))?;
        let seconds = document
            .frames
            .iter()
            .map(|frame| frame.pkt_pts_time.seconds())
            .collect::<PickerResult<Vec<f64>>>()?;
        Self::new(&seconds)
    }

    pub fn load(path: &Path) -> PickerResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PickerError::Config(format!(
                "Failed to read scene document {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Companion scene document path for a video (`movie.mkv` -> `movie.mkv.json`)
    pub fn companion_path(video: &Path) -> PathBuf {
        let mut path = video.as_os_str().to_owned();
        path.push(".json");
        PathBuf::from(path)
    }

    pub fn starts(&self) -> &[Duration] {
        &self.starts
    }

    /// Find `(scene_start, scene_end)` with `scene_start <= position < scene_end`.
    ///
    /// A position before the first boundary, or at/after the last one, has no
    /// closing pair and is reported as out of range.
    pub fn bracket(&self, position: Duration) -> PickerResult<(Duration, Duration)> {
        // Index of the first boundary strictly after `position`
        let next = self.starts.partition_point(|start| *start <= position);
        if next == 0 || next == self.starts.len() {
            return Err(self.out_of_range(position));
        }
        Ok((self.starts[next - 1], self.starts[next]))
    }

    fn out_of_range(&self, position: Duration) -> PickerError {
        PickerError::OutOfRange {
            position: position.as_secs_f64(),
            first: self.starts[0].as_secs_f64(),
            last: self.starts[self.starts.len() - 1].as_secs_f64(),
        }
    }
}
