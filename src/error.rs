//! Error taxonomy for the clip recording engine

use thiserror::Error;

use crate::types::ClipId;

#[derive(Debug, Error)]
pub enum PickerError {
    /// Malformed or missing configuration / scene document
    #[error("Configuration error: {0}")]
    Config(String),

    /// Position, duration or framerate could not be obtained from playback
    #[error("Playback query failed: {0}")]
    PlaybackQuery(String),

    /// Position falls outside the loaded scene boundaries
    #[error("Position {position:.3}s is outside the scene boundaries ({first:.3}s - {last:.3}s)")]
    OutOfRange {
        position: f64,
        first: f64,
        last: f64,
    },

    /// External extraction tool reported an error
    #[error("Extraction failed for {id}: {reason}")]
    Extraction { id: ClipId, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type PickerResult<T> = std::result::Result<T, PickerError>;
