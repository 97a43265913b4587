//! Audio announcement capability.

use anyhow::{anyhow, Context, Result};
use std::process::{Command, Stdio};

/// Speaks (or otherwise surfaces) a short text. Called from the notifier's
/// announcement worker, never from the frame loop.
pub trait Announcer: Send {
    fn announce(&mut self, text: &str) -> Result<()>;
}

/// Writes announcements to the log. Used when no speech program is set.
#[derive(Clone, Debug, Default)]
pub struct LogAnnouncer;

impl Announcer for LogAnnouncer {
    fn announce(&mut self, text: &str) -> Result<()> {
        log::info!("announce: {}", text);
        Ok(())
    }
}

/// Runs a text-to-speech program with the text as its last argument,
/// e.g. `["espeak", "-s", "180"]`.
#[derive(Clone, Debug)]
pub struct CommandAnnouncer {
    program: String,
    args: Vec<String>,
}

impl CommandAnnouncer {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("announce command must name a program"))?;
        if program.trim().is_empty() {
            return Err(anyhow!("announce command must name a program"));
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Announcer for CommandAnnouncer {
    fn announce(&mut self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("spawn announce command {}", self.program))?;
        if !status.success() {
            return Err(anyhow!("announce command {} exited with {}", self.program, status));
        }
        Ok(())
    }
}

/// Announcer for the configured command, or the log when there is none.
pub fn build_announcer(command: Option<&[String]>) -> Result<Box<dyn Announcer>> {
    match command {
        Some(command) if !command.is_empty() => Ok(Box::new(CommandAnnouncer::new(command)?)),
        _ => Ok(Box::new(LogAnnouncer)),
    }
}
