//! Fire-and-forget dispatch to the event sink and the announcer.
//!
//! Each capability gets its own worker thread fed by a bounded queue. The
//! frame loop only enqueues and never blocks: when a worker falls behind
//! (stalled database, long speech) new work is dropped and counted.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::announce::Announcer;
use crate::events::{EventSink, WatchEvent};

/// Jobs buffered per worker before new ones are dropped.
pub const NOTIFY_QUEUE_DEPTH: usize = 64;

enum Job<T> {
    Run(T),
    Flush(mpsc::SyncSender<()>),
}

struct Worker<T> {
    name: &'static str,
    tx: Option<SyncSender<Job<T>>>,
    join: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    fn spawn<F>(name: &'static str, depth: usize, mut handle: F) -> Result<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<Job<T>>(depth);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx {
                    match job {
                        Job::Run(item) => handle(item),
                        Job::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })?;
        Ok(Self {
            name,
            tx: Some(tx),
            join: Some(join),
        })
    }

    /// Queue `item` without blocking. Returns `false` when it was dropped.
    fn submit(&self, item: T) -> bool {
        let Some(tx) = &self.tx else {
            log::warn!("{}: dropped work after shutdown", self.name);
            return false;
        };
        match tx.try_send(Job::Run(item)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("{}: queue full, dropped work", self.name);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("{}: worker gone, dropped work", self.name);
                false
            }
        }
    }

    fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if tx.send(Job::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        // Closing the channel lets the worker drain what is queued and exit.
        self.tx.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} thread panicked", self.name))?;
        }
        Ok(())
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Delivery counters, readable from any thread.
#[derive(Debug, Default)]
pub struct NotifierStats {
    pub events_recorded: AtomicU64,
    pub events_failed: AtomicU64,
    pub announcements_made: AtomicU64,
    pub announcements_failed: AtomicU64,
    /// Not queued because the worker was behind or gone.
    pub events_dropped: AtomicU64,
    pub announcements_dropped: AtomicU64,
}

pub struct Notifier {
    events: Worker<WatchEvent>,
    announcements: Option<Worker<String>>,
    stats: Arc<NotifierStats>,
}

impl Notifier {
    /// Start the workers. With no announcer, announcements are dropped.
    pub fn spawn(sink: Box<dyn EventSink>, announcer: Option<Box<dyn Announcer>>) -> Result<Self> {
        Self::with_depth(sink, announcer, NOTIFY_QUEUE_DEPTH)
    }

    /// `spawn` with a custom per-worker queue depth.
    pub fn with_depth(
        mut sink: Box<dyn EventSink>,
        announcer: Option<Box<dyn Announcer>>,
        depth: usize,
    ) -> Result<Self> {
        let stats = Arc::new(NotifierStats::default());

        let event_stats = stats.clone();
        let events = Worker::spawn("event-sink", depth, move |event: WatchEvent| {
            match sink.record(&event) {
                Ok(()) => {
                    event_stats.events_recorded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    event_stats.events_failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("event sink rejected {} event: {}", event.kind.as_str(), e);
                }
            }
        })?;

        let announcements = match announcer {
            Some(mut announcer) => {
                let announce_stats = stats.clone();
                Some(Worker::spawn("announcer", depth, move |text: String| {
                    match announcer.announce(&text) {
                        Ok(()) => {
                            announce_stats
                                .announcements_made
                                .fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            announce_stats
                                .announcements_failed
                                .fetch_add(1, Ordering::Relaxed);
                            log::warn!("announcement failed: {}", e);
                        }
                    }
                })?)
            }
            None => None,
        };

        Ok(Self {
            events,
            announcements,
            stats,
        })
    }

    pub fn event(&self, event: WatchEvent) {
        if !self.events.submit(event) {
            self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn announce(&self, text: String) {
        if let Some(worker) = &self.announcements {
            if !worker.submit(text) {
                self.stats
                    .announcements_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Block until everything queued so far has been handled.
    pub fn flush(&self) {
        self.events.flush();
        if let Some(worker) = &self.announcements {
            worker.flush();
        }
    }

    pub fn stats(&self) -> Arc<NotifierStats> {
        self.stats.clone()
    }

    /// Drain the queues and stop the workers.
    pub fn shutdown(&mut self) -> Result<()> {
        self.events.shutdown()?;
        if let Some(worker) = self.announcements.as_mut() {
            worker.shutdown()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Identity;
    use crate::storage::InMemoryEventSink;
    use std::sync::Mutex;
    use std::time::Duration;

    struct SlowAnnouncer {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl Announcer for SlowAnnouncer {
        fn announce(&mut self, text: &str) -> Result<()> {
            std::thread::sleep(Duration::from_millis(20));
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn record(&mut self, _event: &WatchEvent) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn flush_waits_for_queued_work() {
        let sink = InMemoryEventSink::new();
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::spawn(
            Box::new(sink.clone()),
            Some(Box::new(SlowAnnouncer {
                spoken: spoken.clone(),
            })),
        )
        .unwrap();

        for _ in 0..3 {
            notifier.event(WatchEvent::sighting("cam", Identity::Unknown, None));
            notifier.announce("hello".to_string());
        }
        notifier.flush();

        assert_eq!(sink.events().len(), 3);
        assert_eq!(spoken.lock().unwrap().len(), 3);
        assert_eq!(notifier.stats().events_recorded.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn sink_failures_are_counted_not_fatal() {
        let mut notifier = Notifier::spawn(Box::new(FailingSink), None).unwrap();
        notifier.event(WatchEvent::sighting("cam", Identity::Unknown, None));
        notifier.announce("dropped".to_string());
        notifier.flush();
        assert_eq!(notifier.stats().events_failed.load(Ordering::Relaxed), 1);
        notifier.shutdown().unwrap();
    }

    /// Blocks every record until the test releases it.
    struct GatedSink {
        gate: mpsc::Receiver<()>,
        inner: InMemoryEventSink,
    }

    impl EventSink for GatedSink {
        fn record(&mut self, event: &WatchEvent) -> Result<()> {
            let _ = self.gate.recv();
            self.inner.record(event)
        }
    }

    #[test]
    fn stalled_sink_drops_instead_of_growing() {
        let (release, gate) = mpsc::channel();
        let sink = InMemoryEventSink::new();
        let notifier = Notifier::with_depth(
            Box::new(GatedSink {
                gate,
                inner: sink.clone(),
            }),
            None,
            4,
        )
        .unwrap();

        for _ in 0..10 {
            notifier.event(WatchEvent::sighting("cam", Identity::Unknown, None));
        }
        let stats = notifier.stats();
        let dropped = stats.events_dropped.load(Ordering::Relaxed);
        // Four queued, at most one already taken by the worker.
        assert!((5..=6).contains(&dropped), "dropped {}", dropped);

        for _ in 0..10 {
            release.send(()).unwrap();
        }
        notifier.flush();
        assert_eq!(sink.events().len() as u64 + dropped, 10);
        assert_eq!(stats.events_recorded.load(Ordering::Relaxed) + dropped, 10);
    }

    #[test]
    fn shutdown_drains_pending_events() {
        let sink = InMemoryEventSink::new();
        let mut notifier = Notifier::spawn(Box::new(sink.clone()), None).unwrap();
        for _ in 0..10 {
            notifier.event(WatchEvent::sighting("cam", Identity::known("ann"), Some(80.0)));
        }
        notifier.shutdown().unwrap();
        assert_eq!(sink.events().len(), 10);
    }
}
