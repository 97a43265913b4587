//! watch_events - print recent events from the local activity log

use anyhow::Result;
use clap::Parser;
use occupant_watch::{SqliteEventSink, WatchEvent};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the activity database.
    #[arg(long, env = "WATCH_DB_PATH", default_value = "security_system.db")]
    db_path: String,
    /// Number of events to show, newest first.
    #[arg(long, default_value_t = 20)]
    limit: usize,
    /// Print one JSON object per line.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let store = SqliteEventSink::open(&args.db_path)?;
    let events = store.recent_events(args.limit)?;
    if events.is_empty() {
        eprintln!("no events in {}", args.db_path);
        return Ok(());
    }
    for event in &events {
        if args.json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{}", describe(event));
        }
    }
    Ok(())
}

fn describe(event: &WatchEvent) -> String {
    let who = event
        .identity
        .as_ref()
        .map(|identity| identity.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {:<18}  {:<12}  {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.kind.as_str(),
        who,
        event.camera_id
    );
    if let Some(confidence) = event.confidence {
        line.push_str(&format!("  conf={:.1}", confidence));
    }
    if let Some(path) = &event.video_path {
        line.push_str(&format!("  {}", path.display()));
    }
    if let Some(duration) = event.duration_seconds {
        line.push_str(&format!("  {:.1}s", duration));
    }
    if let Some(size) = event.file_size_bytes {
        line.push_str(&format!("  {} bytes", size));
    }
    if let Some(detail) = &event.detail {
        line.push_str(&format!("  ({})", detail));
    }
    line
}
