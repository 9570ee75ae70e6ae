//! Shared data types for Video Picker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{PickerError, PickerResult};

/// Clips spanning this many frames or fewer are not worth keeping
pub const MIN_CLIP_FRAMES: u64 = 15;

/// Detection scale used until the operator adjusts it
pub const DEFAULT_DETECTION_SCALE: f64 = 4.5;

/// Scale change applied per scroll step
pub const SCALE_STEP: f64 = 0.16;

/// A timed subtitle entry on the media timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub text: String,
    #[serde(with = "seconds")]
    pub start: Duration,
    #[serde(with = "seconds")]
    pub duration: Duration,
}

impl SubtitleCue {
    pub fn new(text: impl Into<String>, start_secs: f64, duration_secs: f64) -> Self {
        Self {
            text: text.into(),
            start: saturating_secs(start_secs),
            duration: saturating_secs(duration_secs),
        }
    }

    /// Saturates at `Duration::MAX`; parsed cues are checked with [`Self::validate`]
    pub fn end(&self) -> Duration {
        self.start.saturating_add(self.duration)
    }

    pub fn validate(&self) -> PickerResult<()> {
        if self.start.checked_add(self.duration).is_none() {
            return Err(PickerError::Config(format!(
                "Cue {:?} ends past the representable media timeline",
                self.text
            )));
        }
        Ok(())
    }
}

/// Seconds to a `Duration`, rejecting negative, non-finite and out-of-range values
pub fn duration_from_secs(secs: f64) -> PickerResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| PickerError::Config(format!("Invalid time in seconds: {}", secs)))
}

/// Seconds to a `Duration`, clamping into `[0, Duration::MAX]`
pub fn saturating_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Deterministic clip identifier: video short name followed by the cue start in nanoseconds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn new(video_short_name: &str, cue_start: Duration) -> Self {
        ClipId(format!("{}{}", video_short_name, cue_start.as_nanos()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator framing captured when a clip is requested
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Framing {
    pub scale: f64,
    pub center: (f64, f64),
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            scale: DEFAULT_DETECTION_SCALE,
            center: (0.0, 0.0),
        }
    }
}

/// A persisted clip entry in the configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub id: ClipId,
    #[serde(rename = "start")]
    pub start_frame: u64,
    #[serde(rename = "end")]
    pub end_frame: u64,
    pub scale: f64,
    pub center: (f64, f64),
    #[serde(default)]
    pub points_2d: Vec<serde_json::Value>,
    #[serde(default)]
    pub points_3d: Vec<serde_json::Value>,
    pub subtitle: String,
}

impl ClipRecord {
    /// Build a record for a cue, or `None` when the clip is too short to keep
    pub fn from_cue(id: ClipId, cue: &SubtitleCue, framerate: f64, framing: Framing) -> Option<Self> {
        let (start_frame, duration_frames) = frame_span(cue.start, cue.duration, framerate);
        if duration_frames <= MIN_CLIP_FRAMES {
            return None;
        }

        Some(Self {
            id,
            start_frame,
            end_frame: start_frame.saturating_add(duration_frames),
            scale: framing.scale,
            center: framing.center,
            points_2d: Vec::new(),
            points_3d: Vec::new(),
            subtitle: cue.text.clone(),
        })
    }
}

/// Convert a time range to (start frame, duration in frames).
/// Start rounds down, duration rounds up.
pub fn frame_span(start: Duration, duration: Duration, framerate: f64) -> (u64, u64) {
    let start_frame = (start.as_secs_f64() * framerate).floor();
    let duration_frames = (duration.as_secs_f64() * framerate).ceil();
    (start_frame.max(0.0) as u64, duration_frames.max(0.0) as u64)
}

/// Serde helper for durations written as fractional seconds
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(format!(
                "expected a non-negative number of seconds, got {}",
                secs
            ))
        })
    }
}

/// Application version constant
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name constant
pub const APP_NAME: &str = "Video Picker";
