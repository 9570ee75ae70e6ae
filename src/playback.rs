//! Playback collaborator interface
//! The recorder only needs timestamps and flush-seeks from whatever plays the video.

use std::time::Duration;

use crate::error::{PickerError, PickerResult};
use crate::types::SubtitleCue;

pub trait Playback {
    /// Current position on the media timeline
    fn position(&self) -> PickerResult<Duration>;

    /// Total media duration
    fn duration(&self) -> PickerResult<Duration>;

    /// Frames per second of the video stream
    fn framerate(&self) -> PickerResult<f64>;

    /// Seek and drop any cue delivery still pending from before the seek
    fn seek_flush(&mut self, to: Duration) -> PickerResult<()>;
}

/// Deterministic playback over a fixed cue list.
///
/// Cues are handed out in start order; position jumps to each cue's start as it
/// is delivered. Cues that started before the current position and have already
/// ended are never delivered. After a flush-seek a cue still showing at the
/// target time lands again, as it would from a real player.
#[derive(Debug, Clone)]
pub struct ScriptedPlayback {
    cues: Vec<SubtitleCue>,
    cursor: usize,
    position: Duration,
    duration: Duration,
    framerate: Option<f64>,
}

impl ScriptedPlayback {
    pub fn new(mut cues: Vec<SubtitleCue>, framerate: Option<f64>) -> Self {
        cues.sort_by_key(|cue| cue.start);
        let duration = cues.iter().map(SubtitleCue::end).max().unwrap_or_default();
        Self {
            cues,
            cursor: 0,
            position: Duration::ZERO,
            duration,
            framerate,
        }
    }

    /// Extend the media length, e.g. to cover scenes after the last cue
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = self.duration.max(duration);
        self
    }

    /// Start time of the cue that will be delivered next
    pub fn peek_start(&self) -> Option<Duration> {
        self.cues.get(self.cursor).map(|cue| cue.start)
    }

    /// Deliver the next cue, advancing the position to its start
    pub fn next_cue(&mut self) -> Option<SubtitleCue> {
        let position = self.position;
        let cue = loop {
            let cue = self.cues.get(self.cursor)?;
            self.cursor += 1;
            if cue.start >= position || cue.end() > position {
                break cue.clone();
            }
        };
        if cue.start > self.position {
            self.position = cue.start;
        }
        Some(cue)
    }

    /// Let playback run forward to `to` without delivering anything
    pub fn advance_to(&mut self, to: Duration) {
        if to > self.position {
            self.position = to.min(self.duration);
        }
    }
}

impl Playback for ScriptedPlayback {
    fn position(&self) -> PickerResult<Duration> {
        Ok(self.position)
    }

    fn duration(&self) -> PickerResult<Duration> {
        Ok(self.duration)
    }

    fn framerate(&self) -> PickerResult<f64> {
        self.framerate
            .ok_or_else(|| PickerError::PlaybackQuery("Frame rate is not known yet".to_string()))
    }

    fn seek_flush(&mut self, to: Duration) -> PickerResult<()> {
        if to > self.duration {
            return Err(PickerError::PlaybackQuery(format!(
                "Cannot seek to {:.3}s past the end ({:.3}s)",
                to.as_secs_f64(),
                self.duration.as_secs_f64()
            )));
        }
        self.position = to;
        self.cursor = self
            .cues
            .iter()
            .position(|cue| cue.end() > to)
            .unwrap_or(self.cues.len());
        Ok(())
    }
}
