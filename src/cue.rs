//! Tracks the subtitle cue currently on screen

use crate::types::SubtitleCue;

/// How multi-line subtitle text is flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineMode {
    /// Join all lines with spaces
    #[default]
    Join,
    /// Keep only the last line
    LastLine,
}

impl LineMode {
    pub fn from_split_setting(split_sub_lines: bool) -> Self {
        if split_sub_lines {
            LineMode::LastLine
        } else {
            LineMode::Join
        }
    }

    pub fn apply(self, text: &str) -> String {
        match self {
            LineMode::Join => text.replace('\n', " "),
            LineMode::LastLine => text.split('\n').next_back().unwrap_or_default().to_string(),
        }
    }
}

/// Latest cue reported by playback. No history is kept.
#[derive(Debug, Default)]
pub struct CueTracker {
    current: Option<SubtitleCue>,
    line_mode: LineMode,
}

impl CueTracker {
    pub fn new(line_mode: LineMode) -> Self {
        Self {
            current: None,
            line_mode,
        }
    }

    /// Replace the tracked cue and return it with normalized text
    pub fn on_cue(&mut self, mut cue: SubtitleCue) -> &SubtitleCue {
        cue.text = self.line_mode.apply(&cue.text);
        self.current.insert(cue)
    }

    pub fn current(&self) -> Option<&SubtitleCue> {
        self.current.as_ref()
    }
}
