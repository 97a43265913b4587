//! demo - synthetic end-to-end run
//!
//! Feeds a synthetic camera through the full pipeline with a scripted face
//! matcher, writes clips and an activity database into `--out-dir`, and
//! prints what happened.

use anyhow::{anyhow, Result};
use clap::Parser;
use occupant_watch::ingest::FrameSource;
use occupant_watch::{
    input_channel, ClipNamer, Detection, EventSink, InMemoryEventSink, LiveFramePublisher,
    LogAnnouncer, MjpegWriterFactory, Notifier, Pipeline, PipelineParts, PipelineSettings,
    PreviewSettings, RecordingSession, ScriptStep, ScriptedMatcher, SessionSettings,
    SqliteEventSink, SyntheticConfig, SyntheticSource, ThreadScheduler, WatchEvent,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory for clips, the live frame and the activity database.
    #[arg(long, default_value = "demo_out")]
    out_dir: PathBuf,
    /// Frames to generate.
    #[arg(long, default_value_t = 120)]
    frames: u64,
    /// Synthetic camera frame rate.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Recognition stride.
    #[arg(long, default_value_t = 2)]
    stride: u64,
    /// One character per recognition cycle: `u` unknown face, `k` known
    /// face (alice), `.` nobody. Repeats.
    #[arg(long, default_value = "....uuuuuuuuuu...k......uuu.u.uuuuu.........")]
    pattern: String,
    #[arg(long, default_value_t = 1000)]
    confirm_delay_ms: u64,
    #[arg(long, default_value_t = 8)]
    max_duration_secs: u64,
    #[arg(long, default_value_t = 3)]
    cooldown_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    std::fs::create_dir_all(&args.out_dir)?;

    let script = parse_pattern(&args.pattern)?;
    let db_path = args.out_dir.join("activity.db");
    let db_path = db_path
        .to_str()
        .ok_or_else(|| anyhow!("output directory must be valid UTF-8"))?
        .to_string();
    let mirror = InMemoryEventSink::new();
    let notifier = Notifier::spawn(
        Box::new(Tee {
            sqlite: SqliteEventSink::open(&db_path)?,
            memory: mirror.clone(),
        }),
        Some(Box::new(LogAnnouncer)),
    )?;

    let session = RecordingSession::new(
        SessionSettings {
            fps: args.fps,
            confirm_delay: Duration::from_millis(args.confirm_delay_ms),
            max_duration: Duration::from_secs(args.max_duration_secs),
        },
        Box::new(MjpegWriterFactory::default()),
        ClipNamer::new(args.out_dir.join("videos")),
    );
    let publisher = LiveFramePublisher::new(PreviewSettings {
        mirror_path: Some(args.out_dir.join("latest_frame.jpg")),
        ..PreviewSettings::default()
    });

    let (inputs, timers) = input_channel();
    let mut pipeline = Pipeline::new(
        PipelineSettings {
            stride: args.stride,
            window: 3,
            majority: 2,
            cooldown: Duration::from_secs(args.cooldown_secs),
            camera_id: "demo_camera".to_string(),
            overlay: true,
        },
        PipelineParts {
            matcher: Box::new(ScriptedMatcher::new(script).repeating()),
            session,
            publisher,
            notifier,
            scheduler: Box::new(ThreadScheduler::new(inputs)),
        },
    )?;

    let mut source = SyntheticSource::new(SyntheticConfig {
        url: "stub://demo".to_string(),
        target_fps: args.fps,
        width: 320,
        height: 240,
        max_frames: Some(args.frames),
        paced: true,
        noise: 6,
    });
    source.connect()?;

    // Frames are pulled inline; timer inputs are drained between frames.
    while let Some(frame) = source.next_frame()? {
        pipeline.process_frame(frame);
        while let Ok(input) = timers.try_recv() {
            pipeline.handle(input);
        }
    }

    let stats = pipeline.shutdown(Instant::now())?;
    println!("frames processed:   {}", stats.frames_seen);
    println!("recognition cycles: {}", stats.recognition_cycles);
    println!(
        "sightings:          {} ({} suppressed by cooldown)",
        stats.sightings, stats.sightings_suppressed
    );
    println!(
        "clips:              {} finished, {} failed",
        stats.clips_finished, stats.clips_failed
    );
    println!();
    for event in mirror.events() {
        println!("{}", serde_json::to_string(&event)?);
    }
    println!();
    println!("activity log: {}", db_path);
    Ok(())
}

fn parse_pattern(pattern: &str) -> Result<Vec<ScriptStep>> {
    let steps: Vec<ScriptStep> = pattern
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            'u' | 'U' => Ok(ScriptStep::Faces(vec![Detection::unknown()])),
            'k' | 'K' => Ok(ScriptStep::Faces(vec![Detection::known("alice", 92.0)])),
            '.' => Ok(ScriptStep::Faces(Vec::new())),
            other => Err(anyhow!("pattern character '{}' is not one of u, k, .", other)),
        })
        .collect::<Result<_>>()?;
    if steps.is_empty() {
        return Err(anyhow!("pattern must not be empty"));
    }
    Ok(steps)
}

/// Persists to SQLite and keeps a copy for the summary.
struct Tee {
    sqlite: SqliteEventSink,
    memory: InMemoryEventSink,
}

impl EventSink for Tee {
    fn record(&mut self, event: &WatchEvent) -> Result<()> {
        self.memory.record(event)?;
        self.sqlite.record(event)
    }
}
