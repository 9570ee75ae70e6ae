//! Recording state machine
//!
//! Decides which subtitle cues become clips. Two states: `Idle`, where only the
//! manual pick path requests clips, and `ArmedScene`, where every cue that fits
//! inside the current scene is requested until a cue runs past the scene end.
//!
//! All transitions run on the caller's single event loop. A failing transition
//! returns an error and leaves the state exactly as it was.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::cue::{CueTracker, LineMode};
use crate::dispatcher::{DispatchOutcome, ExtractionDispatcher};
use crate::error::{PickerError, PickerResult};
use crate::playback::Playback;
use crate::registry::ClipRegistry;
use crate::types::{Framing, SubtitleCue, SCALE_STEP};
use crate::video::VideoSource;

/// The scene being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSession {
    pub scene_start: Duration,
    pub scene_end: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    ArmedScene(RecordingSession),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    CueArrived(SubtitleCue),
    ArmScene,
    CancelScene,
    PickOnce,
}

/// What a handled event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Cue stored, nothing else to do
    Tracked,
    Requested(DispatchOutcome),
    /// Cue started before the armed scene
    SkippedBeforeScene,
    /// Cue ran past the scene end; back to idle
    SceneFinished,
    Armed(RecordingSession),
    AlreadyArmed,
    Cancelled,
    NotRecording,
    /// Pick requested before any cue arrived
    NoCue,
}

pub struct Recorder {
    video: VideoSource,
    tracker: CueTracker,
    state: RecorderState,
    framing: Framing,
    dispatcher: Arc<ExtractionDispatcher>,
    registry: Arc<ClipRegistry>,
}

impl Recorder {
    pub fn new(
        video: VideoSource,
        dispatcher: Arc<ExtractionDispatcher>,
        registry: Arc<ClipRegistry>,
    ) -> Self {
        let line_mode = LineMode::from_split_setting(registry.split_sub_lines());
        Self {
            video,
            tracker: CueTracker::new(line_mode),
            state: RecorderState::Idle,
            framing: Framing::default(),
            dispatcher,
            registry,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::ArmedScene(_))
    }

    pub fn video(&self) -> &VideoSource {
        &self.video
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Detection center in video pixel coordinates
    pub fn set_center(&mut self, x: f64, y: f64) {
        self.framing.center = (x, y);
    }

    /// Shrink or grow the detection box by scroll steps
    pub fn nudge_scale(&mut self, delta: f64) {
        self.framing.scale -= SCALE_STEP * delta;
    }

    pub fn handle<P: Playback + ?Sized>(
        &mut self,
        event: RecorderEvent,
        playback: &mut P,
    ) -> PickerResult<Outcome> {
        match event {
            RecorderEvent::CueArrived(cue) => self.cue_arrived(cue, playback),
            RecorderEvent::ArmScene => self.arm_scene(playback),
            RecorderEvent::CancelScene => Ok(self.cancel_scene()),
            RecorderEvent::PickOnce => self.pick_once(playback),
        }
    }

    pub fn cue_arrived<P: Playback + ?Sized>(
        &mut self,
        cue: SubtitleCue,
        playback: &P,
    ) -> PickerResult<Outcome> {
        let cue = self.tracker.on_cue(cue).clone();

        let session = match self.state {
            RecorderState::Idle => return Ok(Outcome::Tracked),
            RecorderState::ArmedScene(session) => session,
        };

        if cue.end() >= session.scene_end {
            info!(
                "Clip subtitles end after current scene ({:.3}s >= {:.3}s)",
                cue.end().as_secs_f64(),
                session.scene_end.as_secs_f64()
            );
            self.state = RecorderState::Idle;
            return Ok(Outcome::SceneFinished);
        }

        if cue.start < session.scene_start {
            debug!(
                "Clip subtitles start before current scene ({:.3}s < {:.3}s)",
                cue.start.as_secs_f64(),
                session.scene_start.as_secs_f64()
            );
            return Ok(Outcome::SkippedBeforeScene);
        }

        let framerate = playback.framerate()?;
        debug!("Saving current clip: {:?}", cue.text);
        Ok(Outcome::Requested(self.dispatcher.request(
            &cue,
            framerate,
            &self.video,
            self.framing,
        )))
    }

    pub fn arm_scene<P: Playback + ?Sized>(&mut self, playback: &mut P) -> PickerResult<Outcome> {
        if self.is_recording() {
            warn!("Already recording a scene; cancel it first");
            return Ok(Outcome::AlreadyArmed);
        }

        let scenes = self.video.scenes.as_ref().ok_or_else(|| {
            PickerError::Config(format!(
                "No scene info loaded for {}",
                self.video.path.display()
            ))
        })?;

        let position = playback.position()?;
        let (scene_start, scene_end) = scenes.bracket(position)?;
        info!(
            "Recording scene {:.3}s - {:.3}s (position {:.3}s)",
            scene_start.as_secs_f64(),
            scene_end.as_secs_f64(),
            position.as_secs_f64()
        );

        self.registry.backup()?;
        playback.seek_flush(scene_start)?;

        let session = RecordingSession {
            scene_start,
            scene_end,
        };
        self.state = RecorderState::ArmedScene(session);
        Ok(Outcome::Armed(session))
    }

    pub fn cancel_scene(&mut self) -> Outcome {
        match self.state {
            RecorderState::Idle => Outcome::NotRecording,
            RecorderState::ArmedScene(_) => {
                info!("Scene recording cancelled");
                self.state = RecorderState::Idle;
                Outcome::Cancelled
            }
        }
    }

    pub fn pick_once<P: Playback + ?Sized>(&mut self, playback: &P) -> PickerResult<Outcome> {
        let position = playback.position()?;
        let Some(cue) = self.tracker.current().cloned() else {
            info!("Nothing to pick at {:.3}s: no subtitle yet", position.as_secs_f64());
            return Ok(Outcome::NoCue);
        };

        let framerate = playback.framerate()?;
        debug!("Picking {:?} at {:.3}s", cue.text, position.as_secs_f64());
        Ok(Outcome::Requested(self.dispatcher.request(
            &cue,
            framerate,
            &self.video,
            self.framing,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::test_support::CountingExtractor;
    use crate::playback::ScriptedPlayback;
    use crate::scenes::SceneBoundaries;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        recorder: Recorder,
        registry: Arc<ClipRegistry>,
        dispatcher: Arc<ExtractionDispatcher>,
        extractor: Arc<CountingExtractor>,
    }

    fn fixture(video: VideoSource) -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry =
            Arc::new(ClipRegistry::load_or_create(dir.path().join("config.json")).unwrap());
        let extractor = Arc::new(CountingExtractor::default());
        let dispatcher = Arc::new(ExtractionDispatcher::new(
            extractor.clone(),
            Arc::clone(&registry),
        ));
        let recorder = Recorder::new(video, Arc::clone(&dispatcher), Arc::clone(&registry));
        Fixture {
            dir,
            recorder,
            registry,
            dispatcher,
            extractor,
        }
    }

    fn scene_video() -> VideoSource {
        VideoSource::with_scenes(
            "show-ep01.mkv",
            SceneBoundaries::new(&[0.0, 10.0, 25.0, 40.0]).unwrap(),
        )
    }

    /// Playback paused at `position` on a 45 second video
    fn playback_at(position: f64) -> ScriptedPlayback {
        let mut playback = ScriptedPlayback::new(Vec::new(), Some(24.0))
            .with_duration(Duration::from_secs(45));
        playback.advance_to(Duration::from_secs_f64(position));
        playback
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn backups(dir: &TempDir) -> usize {
        fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("config.json.bak-")
            })
            .count()
    }

    struct BrokenPlayback;

    impl Playback for BrokenPlayback {
        fn position(&self) -> PickerResult<Duration> {
            Err(PickerError::PlaybackQuery("Could not get playback position".into()))
        }
        fn duration(&self) -> PickerResult<Duration> {
            Err(PickerError::PlaybackQuery("Could not get playback duration".into()))
        }
        fn framerate(&self) -> PickerResult<f64> {
            Err(PickerError::PlaybackQuery("No video caps".into()))
        }
        fn seek_flush(&mut self, _to: Duration) -> PickerResult<()> {
            Err(PickerError::PlaybackQuery("Seek failed".into()))
        }
    }

    #[tokio::test]
    async fn test_arm_seeks_to_scene_start_and_backs_up() {
        let mut fx = fixture(scene_video());
        let mut playback = playback_at(17.0);

        let outcome = fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap();
        let session = RecordingSession {
            scene_start: secs(10.0),
            scene_end: secs(25.0),
        };
        assert_eq!(outcome, Outcome::Armed(session));
        assert_eq!(fx.recorder.state(), RecorderState::ArmedScene(session));
        assert_eq!(playback.position().unwrap(), secs(10.0));
        assert_eq!(backups(&fx.dir), 1);
    }

    #[tokio::test]
    async fn test_cue_past_scene_end_finishes_scene() {
        let mut fx = fixture(scene_video());
        let mut playback = playback_at(17.0);
        fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap();

        let cue = SubtitleCue::new("Too late.", 24.0, 2.0);
        let outcome = fx
            .recorder
            .handle(RecorderEvent::CueArrived(cue), &mut playback)
            .unwrap();
        fx.dispatcher.drain().await;

        assert_eq!(outcome, Outcome::SceneFinished);
        assert_eq!(fx.recorder.state(), RecorderState::Idle);
        assert_eq!(fx.extractor.calls(), 0);
        assert!(fx.registry.clips().is_empty());
    }

    #[tokio::test]
    async fn test_residual_cue_before_scene_is_skipped() {
        let mut fx = fixture(scene_video());
        let mut playback = playback_at(17.0);
        fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap();

        let cue = SubtitleCue::new("Still talking.", 8.0, 3.0);
        let outcome = fx
            .recorder
            .handle(RecorderEvent::CueArrived(cue), &mut playback)
            .unwrap();

        assert_eq!(outcome, Outcome::SkippedBeforeScene);
        assert!(fx.recorder.is_recording());
        assert_eq!(fx.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_cue_inside_scene_is_requested() {
        let mut fx = fixture(scene_video());
        let mut playback = playback_at(17.0);
        fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap();
        fx.recorder.set_center(640.0, 360.0);

        let cue = SubtitleCue::new("Over here.", 12.0, 2.0);
        let outcome = fx
            .recorder
            .handle(RecorderEvent::CueArrived(cue.clone()), &mut playback)
            .unwrap();
        fx.dispatcher.drain().await;

        let id = fx.recorder.video().clip_id(cue.start);
        assert_eq!(outcome, Outcome::Requested(DispatchOutcome::Dispatched(id.clone())));
        assert!(fx.recorder.is_recording());

        let clips = fx.registry.clips();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].id, id);
        assert_eq!(clips[0].center, (640.0, 360.0));
    }

    #[tokio::test]
    async fn test_cancel_stops_future_requests() {
        let mut fx = fixture(scene_video());
        let mut playback = playback_at(17.0);
        fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap();

        assert_eq!(
            fx.recorder.handle(RecorderEvent::CancelScene, &mut playback).unwrap(),
            Outcome::Cancelled
        );
        let outcome = fx
            .recorder
            .handle(
                RecorderEvent::CueArrived(SubtitleCue::new("Quiet.", 12.0, 2.0)),
                &mut playback,
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Tracked);
        assert_eq!(
            fx.recorder.handle(RecorderEvent::CancelScene, &mut playback).unwrap(),
            Outcome::NotRecording
        );
        assert_eq!(fx.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_arm_twice_keeps_session() {
        let mut fx = fixture(scene_video());
        let mut playback = playback_at(17.0);
        fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap();
        playback.advance_to(secs(30.0));

        assert_eq!(
            fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap(),
            Outcome::AlreadyArmed
        );
        assert_eq!(
            fx.recorder.state(),
            RecorderState::ArmedScene(RecordingSession {
                scene_start: secs(10.0),
                scene_end: secs(25.0),
            })
        );
        assert_eq!(backups(&fx.dir), 1);
    }

    #[tokio::test]
    async fn test_pick_uses_current_cue_in_any_state() {
        let mut fx = fixture(scene_video());
        let mut playback = playback_at(3.0);

        assert_eq!(
            fx.recorder.handle(RecorderEvent::PickOnce, &mut playback).unwrap(),
            Outcome::NoCue
        );

        fx.recorder
            .handle(
                RecorderEvent::CueArrived(SubtitleCue::new("Pick me.", 2.0, 2.0)),
                &mut playback,
            )
            .unwrap();
        let outcome = fx.recorder.handle(RecorderEvent::PickOnce, &mut playback).unwrap();
        assert!(matches!(
            outcome,
            Outcome::Requested(DispatchOutcome::Dispatched(_))
        ));
        assert_eq!(fx.recorder.state(), RecorderState::Idle);

        fx.dispatcher.drain().await;
        let again = fx.recorder.handle(RecorderEvent::PickOnce, &mut playback).unwrap();
        assert!(matches!(
            again,
            Outcome::Requested(DispatchOutcome::AlreadyPersisted(_))
        ));
        assert_eq!(fx.extractor.calls(), 1);
        assert_eq!(fx.registry.clips().len(), 1);
    }

    #[tokio::test]
    async fn test_playback_failure_leaves_state_untouched() {
        let mut fx = fixture(scene_video());
        let mut broken = BrokenPlayback;

        let err = fx.recorder.handle(RecorderEvent::ArmScene, &mut broken).unwrap_err();
        assert!(matches!(err, PickerError::PlaybackQuery(_)));
        assert_eq!(fx.recorder.state(), RecorderState::Idle);
        assert_eq!(backups(&fx.dir), 0);

        // Arm for real, then a framerate failure on a cue keeps the session
        let mut playback = playback_at(17.0);
        fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap();
        let err = fx
            .recorder
            .handle(
                RecorderEvent::CueArrived(SubtitleCue::new("Line.", 12.0, 2.0)),
                &mut broken,
            )
            .unwrap_err();
        assert!(matches!(err, PickerError::PlaybackQuery(_)));
        assert!(fx.recorder.is_recording());

        let err = fx.recorder.handle(RecorderEvent::PickOnce, &mut broken).unwrap_err();
        assert!(matches!(err, PickerError::PlaybackQuery(_)));
        assert_eq!(fx.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_arm_outside_scenes_is_rejected() {
        let mut fx = fixture(scene_video());
        let mut playback = playback_at(42.0);

        let err = fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap_err();
        assert!(matches!(err, PickerError::OutOfRange { .. }));
        assert_eq!(fx.recorder.state(), RecorderState::Idle);
        assert_eq!(playback.position().unwrap(), secs(42.0));
        assert_eq!(backups(&fx.dir), 0);
    }

    #[tokio::test]
    async fn test_arm_without_scene_info() {
        let mut fx = fixture(VideoSource::open("/nonexistent/show-ep09.mkv"));
        let mut playback = playback_at(5.0);

        let err = fx.recorder.handle(RecorderEvent::ArmScene, &mut playback).unwrap_err();
        assert!(matches!(err, PickerError::Config(_)));
        assert!(!fx.recorder.is_recording());
    }

    #[test]
    fn test_framing_adjustments() {
        let dir = TempDir::new().unwrap();
        let registry =
            Arc::new(ClipRegistry::load_or_create(dir.path().join("config.json")).unwrap());
        let dispatcher = Arc::new(ExtractionDispatcher::new(
            Arc::new(CountingExtractor::default()),
            Arc::clone(&registry),
        ));
        let mut recorder = Recorder::new(scene_video(), dispatcher, registry);

        recorder.nudge_scale(2.0);
        recorder.nudge_scale(-1.0);
        assert!((recorder.framing().scale - 4.34).abs() < 1e-9);
        recorder.set_center(10.0, 20.0);
        assert_eq!(recorder.framing().center, (10.0, 20.0));
    }
}
