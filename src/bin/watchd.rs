//! watchd - presence watcher daemon
//!
//! Configuration comes from `WATCH_CONFIG` (JSON or TOML) and `WATCH_*`
//! environment overrides. Ctrl-C stops the loop; an open clip is closed and
//! reported before exit.

use anyhow::{anyhow, Result};
use occupant_watch::{input_channel, open_source, spawn_capture, Pipeline, PipelineInput, WatchConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = WatchConfig::load()?;
    log::info!("watchd starting. events -> {}", cfg.events.db_path);
    log::info!(
        "recording to {} (confirm {:?}, max {:?}, {} fps)",
        cfg.recording.dir.display(),
        cfg.recording.confirm_delay,
        cfg.recording.max_duration,
        cfg.recording.fps
    );
    if let Some(path) = &cfg.live.frame_path {
        log::info!("live frame mirrored to {}", path.display());
    }

    let source = open_source(&cfg.source)?;
    let (inputs, queue) = input_channel();
    let mut pipeline = Pipeline::from_config(&cfg, inputs.clone())?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let inputs = inputs.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
            let _ = inputs.try_send(PipelineInput::Shutdown);
        })
        .map_err(|e| anyhow!("install Ctrl-C handler: {}", e))?;
    }

    let capture = spawn_capture(source, cfg.source.retry_delay, inputs, stop.clone())?;
    pipeline.run(queue, &stop);
    log::info!("shutdown requested, closing pipeline...");
    stop.store(true, Ordering::Relaxed);

    match capture.join() {
        Ok(stats) => log::info!(
            "source {} delivered {} frames",
            stats.source,
            stats.frames_captured
        ),
        Err(_) => log::warn!("capture thread panicked"),
    }
    let stats = pipeline.shutdown(Instant::now())?;
    log::info!(
        "watchd stopped: frames={} sightings={} clips={} failed={}",
        stats.frames_seen,
        stats.sightings,
        stats.clips_finished,
        stats.clips_failed
    );
    Ok(())
}
