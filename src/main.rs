//! Video Picker
//! Picks single-sentence clips from a video: subtitle cues become numbered
//! image sequences plus a clip entry in config.json, either one at a time or
//! for every cue inside a scene.

mod config;
mod cue;
mod dispatcher;
mod error;
mod playback;
mod recorder;
mod registry;
mod replay;
mod scenes;
mod types;
mod video;

use anyhow::{anyhow, Context, Result};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use dispatcher::{ExtractionDispatcher, FfmpegExtractor, JobReport};
use playback::ScriptedPlayback;
use recorder::{Recorder, RecorderEvent};
use registry::ClipRegistry;
use replay::{Command, ScheduledCommand};
use types::{SubtitleCue, APP_NAME, APP_VERSION};
use video::VideoSource;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Check and strip --debug flag
    let debug_mode = args.contains(&"--debug".to_string());
    init_logging(debug_mode)?;
    log::debug!("Raw Args: {:?}", args);

    let (config_path, actual_args) = split_global_args(&args)?;

    if actual_args.len() < 2 {
        print_help(&args[0]);
        return Ok(());
    }

    handle_cli_command(&actual_args, config_path).await
}

fn init_logging(debug_mode: bool) -> Result<()> {
    if debug_mode {
        let _ = WriteLogger::init(
            LevelFilter::Debug,
            Config::default(),
            OpenOptions::new()
                .create(true)
                .append(true)
                .open("debug.log")?,
        );
        log::info!("Starting {} {} with debug logging", APP_NAME, APP_VERSION);
    } else {
        let _ = TermLogger::init(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        );
    }
    Ok(())
}

/// Pull `--debug` and `--config <path>` out of the argument list
fn split_global_args(args: &[String]) -> Result<(PathBuf, Vec<String>)> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" => {}
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config needs a file path"))?;
                config_path = PathBuf::from(value);
            }
            _ => rest.push(arg.clone()),
        }
    }

    Ok((config_path, rest))
}

/// Handle CLI commands (scenes, replay, pick, clips)
async fn handle_cli_command(args: &[String], config_path: PathBuf) -> Result<()> {
    let command = args[1].as_str();

    match command {
        "scenes" => {
            if args.len() < 3 {
                eprintln!("Usage: {} scenes <video> [position_seconds]", args[0]);
                std::process::exit(1);
            }
            show_scenes(&args[2], args.get(3).map(String::as_str))
        }

        "replay" => {
            if args.len() < 4 {
                eprintln!(
                    "Usage: {} replay <video> <cues.json> [--fps N] [--arm S]... [--pick S]... [--cancel S]...",
                    args[0]
                );
                eprintln!("\nExample:");
                eprintln!("  {} replay show-ep01.mkv ep01.cues.json --arm 95.5", args[0]);
                std::process::exit(1);
            }
            run_replay(&args[2], &args[3], &args[4..], config_path).await
        }

        "pick" => {
            if args.len() < 5 {
                eprintln!(
                    "Usage: {} pick <video> <start_seconds> <duration_seconds> [text] [--fps N] [--center X,Y] [--scale-steps N]",
                    args[0]
                );
                std::process::exit(1);
            }
            run_pick(&args[2..], config_path).await
        }

        "clips" => list_clips(config_path),

        "help" | "--help" | "-h" => {
            print_help(&args[0]);
            Ok(())
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            print_help(&args[0]);
            std::process::exit(1);
        }
    }
}

/// Print help message
fn print_help(program: &str) {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!();
    println!("USAGE:");
    println!(
        "  {} scenes <video> [pos]              List scenes, or the scene around pos",
        program
    );
    println!(
        "  {} replay <video> <cues.json> [opts] Drive the recorder with a cue list",
        program
    );
    println!(
        "  {} pick <video> <start> <dur> [text] Extract a single clip",
        program
    );
    println!(
        "  {} clips                             List recorded clips",
        program
    );
    println!(
        "  {} help                              Show this help message",
        program
    );
    println!();
    println!("REPLAY OPTIONS:");
    println!("  --fps N       Frame rate (default: probed with ffprobe)");
    println!("  --arm S       Arm scene recording when playback reaches S seconds");
    println!("  --pick S      Pick the cue on screen at S seconds");
    println!("  --cancel S    Cancel scene recording at S seconds");
    println!();
    println!("CLIP OPTIONS (replay and pick):");
    println!("  --center X,Y      Detection center in video pixels (default 0,0)");
    println!("  --scale-steps N   Shrink the detection box by N scroll steps (negative grows)");
    println!();
    println!("GLOBAL OPTIONS:");
    println!("  --config PATH Configuration document (default: config.json)");
    println!("  --debug       Write debug logging to debug.log");
    println!();
    println!("Scene boundaries are read from <video>.json next to the video.");
}

fn parse_seconds(value: &str, what: &str) -> Result<f64> {
    let secs: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}: {}", what, value))?;
    if Duration::try_from_secs_f64(secs).is_err() {
        return Err(anyhow!("Invalid {}: {} (must be >= 0)", what, value));
    }
    Ok(secs)
}

fn show_scenes(video_path: &str, position: Option<&str>) -> Result<()> {
    let video = VideoSource::open(video_path);
    let scenes = video
        .scenes
        .as_ref()
        .ok_or_else(|| anyhow!("No usable scene info for {}", video_path))?;

    match position {
        Some(value) => {
            let position = parse_seconds(value, "position")?;
            let (start, end) = scenes.bracket(types::duration_from_secs(position)?)?;
            println!(
                "{:.3}s is in scene {:.3}s - {:.3}s",
                position,
                start.as_secs_f64(),
                end.as_secs_f64()
            );
        }
        None => {
            println!("🎬 {} scene boundaries for {}", scenes.starts().len(), video_path);
            for (i, start) in scenes.starts().iter().enumerate() {
                println!("   [{}] {:.3}s", i, start.as_secs_f64());
            }
        }
    }
    Ok(())
}

/// Shared setup for commands that extract clips
struct Engine {
    registry: Arc<ClipRegistry>,
    dispatcher: Arc<ExtractionDispatcher>,
    reports: mpsc::UnboundedReceiver<JobReport>,
}

impl Engine {
    fn start(config_path: PathBuf) -> Result<Self> {
        let registry = Arc::new(
            ClipRegistry::load_or_create(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?,
        );
        log::debug!("Using config {}", registry.path().display());
        let ffmpeg_path = registry.ffmpeg_path();
        video::check_dependencies(&ffmpeg_path)?;

        let (tx, reports) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(
            ExtractionDispatcher::new(
                Arc::new(FfmpegExtractor::new(ffmpeg_path)),
                Arc::clone(&registry),
            )
            .with_reports(tx),
        );

        Ok(Self {
            registry,
            dispatcher,
            reports,
        })
    }

    /// Wait for outstanding jobs and print how each one ended
    async fn finish(mut self) -> usize {
        let pending = self.dispatcher.in_flight_count();
        if pending > 0 {
            println!("⏳ Waiting for {} extraction jobs...", pending);
        }
        self.dispatcher.drain().await;

        let mut persisted = 0;
        while let Ok(report) = self.reports.try_recv() {
            match report {
                JobReport::Persisted(id) => {
                    persisted += 1;
                    println!("✅ Saved clip {}", id);
                }
                JobReport::Duplicate(id) => println!("   Clip {} was already saved", id),
                JobReport::Discarded { id, frames } => {
                    println!("   Skipped clip {} ({} frames is too short)", id, frames)
                }
                JobReport::Failed { id, reason } => {
                    eprintln!("❌ Extraction failed for {}: {}", id, reason)
                }
                JobReport::WriteFailed { id, reason } => {
                    eprintln!("❌ Could not save clip {}: {}", id, reason)
                }
            }
        }
        persisted
    }
}

/// Options shared by `replay` and `pick`; anything else is positional
#[derive(Debug, Default)]
struct ExtractOptions {
    fps: Option<f64>,
    center: Option<(f64, f64)>,
    scale_steps: Option<f64>,
    commands: Vec<ScheduledCommand>,
    positional: Vec<String>,
}

impl ExtractOptions {
    fn parse(args: &[String]) -> Result<Self> {
        let mut options = ExtractOptions::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            if !arg.starts_with("--") {
                options.positional.push(arg.clone());
                continue;
            }
            let value = iter
                .next()
                .ok_or_else(|| anyhow!("{} needs a value", arg))?;
            match arg.as_str() {
                "--fps" => options.fps = Some(parse_seconds(value, "frame rate")?),
                "--center" => options.center = Some(parse_center(value)?),
                "--scale-steps" => {
                    options.scale_steps = Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid scale steps: {}", value))?,
                    )
                }
                "--arm" => options.commands.push(ScheduledCommand::new(
                    parse_seconds(value, "arm time")?,
                    Command::Arm,
                )),
                "--pick" => options.commands.push(ScheduledCommand::new(
                    parse_seconds(value, "pick time")?,
                    Command::Pick,
                )),
                "--cancel" => options.commands.push(ScheduledCommand::new(
                    parse_seconds(value, "cancel time")?,
                    Command::Cancel,
                )),
                other => return Err(anyhow!("Unknown option: {}", other)),
            }
        }

        Ok(options)
    }

    fn apply_framing(&self, recorder: &mut Recorder) {
        if let Some((x, y)) = self.center {
            recorder.set_center(x, y);
        }
        if let Some(steps) = self.scale_steps {
            recorder.nudge_scale(steps);
        }
        log::debug!("Framing: {:?}", recorder.framing());
    }
}

/// Parse `X,Y` pixel coordinates
fn parse_center(value: &str) -> Result<(f64, f64)> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| anyhow!("Center must look like X,Y: {}", value))?;
    let x: f64 = x.trim().parse().with_context(|| format!("Invalid center x: {}", x))?;
    let y: f64 = y.trim().parse().with_context(|| format!("Invalid center y: {}", y))?;
    Ok((x, y))
}

fn resolve_framerate(fps: Option<f64>, video: &VideoSource) -> Result<f64> {
    match fps {
        Some(fps) if fps > 0.0 => Ok(fps),
        Some(fps) => Err(anyhow!("Invalid frame rate: {}", fps)),
        None => video::probe_framerate(&video.path).with_context(|| {
            format!(
                "Could not determine the frame rate of {}; pass --fps",
                video.path.display()
            )
        }),
    }
}

async fn run_replay(
    video_path: &str,
    cues_path: &str,
    options: &[String],
    config_path: PathBuf,
) -> Result<()> {
    let options = ExtractOptions::parse(options)?;
    if let Some(extra) = options.positional.first() {
        return Err(anyhow!("Unexpected argument: {}", extra));
    }

    let engine = Engine::start(config_path)?;
    let video = VideoSource::open(video_path);
    let framerate = resolve_framerate(options.fps, &video)?;
    let cues = replay::load_cues(Path::new(cues_path))?;

    let last_boundary = video
        .scenes
        .as_ref()
        .and_then(|scenes| scenes.starts().last().copied())
        .unwrap_or_default();
    let mut playback = ScriptedPlayback::new(cues, Some(framerate)).with_duration(last_boundary);

    println!("🎬 Replaying {} at {:.3} fps", video_path, framerate);
    let mut recorder = Recorder::new(
        video,
        Arc::clone(&engine.dispatcher),
        Arc::clone(&engine.registry),
    );
    options.apply_framing(&mut recorder);
    let summary = replay::run(&mut recorder, &mut playback, options.commands);
    log::debug!("Replay finished in state {:?}", recorder.state());

    let persisted = engine.finish().await;
    println!(
        "✅ {} cues played, {} scenes finished, {} clips requested, {} saved ({} duplicates, {} errors)",
        summary.cues,
        summary.scenes_finished,
        summary.dispatched,
        persisted,
        summary.duplicates,
        summary.errors
    );
    Ok(())
}

async fn run_pick(args: &[String], config_path: PathBuf) -> Result<()> {
    let options = ExtractOptions::parse(args)?;
    if !options.commands.is_empty() {
        return Err(anyhow!("--arm, --pick and --cancel only apply to replay"));
    }
    let positional: Vec<&str> = options.positional.iter().map(String::as_str).collect();

    let (video_path, start, duration) = match positional.as_slice() {
        [video, start, duration, ..] => (
            *video,
            parse_seconds(start, "start")?,
            parse_seconds(duration, "duration")?,
        ),
        _ => return Err(anyhow!("pick needs <video> <start> <duration>")),
    };
    let text = positional.get(3..).unwrap_or_default().join(" ");

    let engine = Engine::start(config_path)?;
    let video = VideoSource::open(video_path);
    let framerate = resolve_framerate(options.fps, &video)?;

    let cue = SubtitleCue::new(text, start, duration);
    cue.validate()?;
    let mut playback = ScriptedPlayback::new(vec![cue], Some(framerate));
    let mut recorder = Recorder::new(
        video,
        Arc::clone(&engine.dispatcher),
        Arc::clone(&engine.registry),
    );
    options.apply_framing(&mut recorder);

    if let Some(cue) = playback.next_cue() {
        recorder.handle(RecorderEvent::CueArrived(cue), &mut playback)?;
    }
    let outcome = recorder.handle(RecorderEvent::PickOnce, &mut playback)?;
    log::debug!("Pick outcome: {:?}", outcome);

    engine.finish().await;
    Ok(())
}

fn list_clips(config_path: PathBuf) -> Result<()> {
    let registry = ClipRegistry::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let clips = registry.clips();

    println!("📋 {} clips in {}", clips.len(), config_path.display());
    for clip in clips {
        println!(
            "   {:<24} frames {:>7} - {:<7} {}",
            clip.id.as_str(),
            clip.start_frame,
            clip.end_frame,
            clip.subtitle
        );
    }
    Ok(())
}
