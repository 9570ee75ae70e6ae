//! Video processing module for Video Picker
//! Handles ffmpeg frame extraction, ffprobe queries and source video metadata

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::scenes::SceneBoundaries;
use crate::types::ClipId;

/// Short name used as the clip id prefix.
///
/// Takes the file name segment between the last two dots and keeps what follows
/// its last dash: `show-ep01.mkv` -> `ep01`, `a.b.mkv` -> `b`.
pub fn video_short_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let re = match Regex::new(r"(?:^|[.\-])([^.\-]*)\.[^.]*$") {
        Ok(re) => re,
        Err(_) => return file_name,
    };
    re.captures(&file_name)
        .and_then(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .unwrap_or(file_name)
}

/// A loaded source video: its path, id prefix and scene boundaries if available
#[derive(Debug, Clone)]
pub struct VideoSource {
    pub path: PathBuf,
    pub short_name: String,
    pub scenes: Option<SceneBoundaries>,
}

impl VideoSource {
    /// Open a video and read its companion scene document.
    /// A missing document is only a warning; scene recording will refuse to arm.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let scene_path = SceneBoundaries::companion_path(&path);
        let scenes = if scene_path.is_file() {
            match SceneBoundaries::load(&scene_path) {
                Ok(scenes) => Some(scenes),
                Err(e) => {
                    warn!("Ignoring scene info {}: {}", scene_path.display(), e);
                    None
                }
            }
        } else {
            warn!(
                "Expected scene info file {}, but none was found.",
                scene_path.display()
            );
            None
        };

        Self {
            short_name: video_short_name(&path),
            path,
            scenes,
        }
    }

    #[cfg(test)]
    pub fn with_scenes(path: impl Into<PathBuf>, scenes: SceneBoundaries) -> Self {
        let path = path.into();
        Self {
            short_name: video_short_name(&path),
            path,
            scenes: Some(scenes),
        }
    }

    pub fn clip_id(&self, cue_start: Duration) -> ClipId {
        ClipId::new(&self.short_name, cue_start)
    }
}

/// Check if required external dependencies are available
pub fn check_dependencies(ffmpeg_path: &str) -> Result<()> {
    let ffmpeg = Command::new(ffmpeg_path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output();

    if ffmpeg.is_err() {
        let mut msg = format!(
            "Missing required dependency: {}.\nPlease install it first.",
            ffmpeg_path
        );
        match std::env::consts::OS {
            "linux" => msg.push_str(
                "\n\nOn Linux (Ubuntu/Debian), try:\n  sudo apt update && sudo apt install ffmpeg",
            ),
            "macos" => msg.push_str("\n\nOn macOS, try:\n  brew install ffmpeg"),
            "windows" => msg.push_str("\n\nOn Windows, ensure ffmpeg is in your PATH."),
            _ => {}
        }
        return Err(anyhow!(msg));
    }

    Ok(())
}

/// Parse an ffprobe frame rate such as `30000/1001` or `25`
pub fn parse_framerate(value: &str) -> Option<f64> {
    let value = value.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Frame rate of the first video stream using ffprobe
pub fn probe_framerate(file_path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(file_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("ffprobe failed: {}", stderr.trim()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_framerate(&stdout).ok_or_else(|| anyhow!("Failed to parse frame rate {:?}", stdout.trim()))
}

/// ffmpeg arguments for one clip. Times keep full precision so the cut matches
/// the frame span recorded for the clip.
fn extraction_args(
    source_path: &Path,
    start: Duration,
    duration: Duration,
    output_pattern: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-ss"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(start.as_secs_f64().to_string().into());
    args.push("-i".into());
    args.push(source_path.into());
    args.push("-t".into());
    args.push(duration.as_secs_f64().to_string().into());
    args.push("-y".into());
    args.push(output_pattern.into());
    args
}

/// Extract the frames of `[start, start + duration)` as a numbered image sequence
pub fn extract_frames(
    ffmpeg_path: &str,
    source_path: &Path,
    start: Duration,
    duration: Duration,
    output_pattern: &Path,
) -> Result<()> {
    if let Some(dir) = output_pattern.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    let mut command = Command::new(ffmpeg_path);
    command.args(extraction_args(source_path, start, duration, output_pattern));
    debug!("ffmpeg command: {:?}", command);

    let output = command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .context("Failed to execute ffmpeg for extraction")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("ffmpeg extraction failed: {}", stderr.trim()));
    }

    Ok(())
}
