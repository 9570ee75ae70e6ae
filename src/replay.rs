//! Replay driver
//! Single-threaded event loop feeding scripted playback and operator commands
//! into the recorder, one event at a time.

use log::{debug, error, info};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::dispatcher::DispatchOutcome;
use crate::error::{PickerError, PickerResult};
use crate::playback::{Playback, ScriptedPlayback};
use crate::recorder::{Outcome, Recorder, RecorderEvent};
use crate::types::{saturating_secs, SubtitleCue};

/// Operator command fired when playback reaches a given time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Arm,
    Pick,
    Cancel,
}

impl Command {
    fn event(self) -> RecorderEvent {
        match self {
            Command::Arm => RecorderEvent::ArmScene,
            Command::Pick => RecorderEvent::PickOnce,
            Command::Cancel => RecorderEvent::CancelScene,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub at: Duration,
    pub command: Command,
}

impl ScheduledCommand {
    pub fn new(at_secs: f64, command: Command) -> Self {
        Self {
            at: saturating_secs(at_secs),
            command,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Cue deliveries, counting re-deliveries after seeks
    pub cues: usize,
    pub dispatched: usize,
    pub duplicates: usize,
    pub scenes_finished: usize,
    pub errors: usize,
}

impl ReplaySummary {
    fn record(&mut self, result: PickerResult<Outcome>) {
        match result {
            Ok(Outcome::Requested(DispatchOutcome::Dispatched(_))) => self.dispatched += 1,
            Ok(Outcome::Requested(outcome)) => {
                debug!("Skipped duplicate request: {:?}", outcome);
                self.duplicates += 1;
            }
            Ok(Outcome::SceneFinished) => self.scenes_finished += 1,
            Ok(outcome) => debug!("{:?}", outcome),
            Err(e) => {
                error!("{}", e);
                self.errors += 1;
            }
        }
    }
}

/// Read a JSON cue list: `[{"text": "...", "start": 1.5, "duration": 2.0}, ...]`
pub fn load_cues(path: &Path) -> PickerResult<Vec<SubtitleCue>> {
    let content = fs::read_to_string(path).map_err(|e| {
        PickerError::Config(format!("Failed to read cue list {}: {}", path.display(), e))
    })?;
    let cues: Vec<SubtitleCue> = serde_json::from_str(&content)
        .map_err(|e| PickerError::Config(format!("Failed to parse cue list: {}", e)))?;
    for cue in &cues {
        cue.validate()?;
    }
    Ok(cues)
}

/// Play every cue through the recorder, firing commands as playback reaches them.
/// A failing event is logged and counted; the loop keeps going.
pub fn run(
    recorder: &mut Recorder,
    playback: &mut ScriptedPlayback,
    mut commands: Vec<ScheduledCommand>,
) -> ReplaySummary {
    commands.sort_by_key(|cmd| cmd.at);
    let mut pending: VecDeque<ScheduledCommand> = commands.into();
    let mut summary = ReplaySummary::default();

    info!(
        "Replaying {} ({:.3}s) with {} commands",
        recorder.video().path.display(),
        playback.duration().unwrap_or_default().as_secs_f64(),
        pending.len()
    );

    loop {
        // Commands due before the next cue fire first
        while pending
            .front()
            .is_some_and(|cmd| playback.peek_start().map_or(true, |start| cmd.at <= start))
        {
            let Some(cmd) = pending.pop_front() else {
                break;
            };
            playback.advance_to(cmd.at);
            debug!("{:?} at {:.3}s", cmd.command, cmd.at.as_secs_f64());
            summary.record(recorder.handle(cmd.command.event(), playback));
        }

        let Some(cue) = playback.next_cue() else {
            break;
        };
        summary.cues += 1;
        summary.record(recorder.handle(RecorderEvent::CueArrived(cue), playback));
    }

    summary
}
