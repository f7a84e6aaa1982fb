//! Recorder: turns every message under a base topic into a log entry with
//! a gapless, monotonically increasing index.
//!
//! Messages are handled synchronously on the thread driving the broker
//! connection, so a slow append delays further deliveries instead of
//! dropping or reordering them.
use crate::broker::{Broker, ConnectionHandler};
use crate::clock::now_unix_secs;
use crate::error::{Error, Result};
use crate::record::{DurableLog, LogEntry};
use crate::topic::subtree_pattern;
use tracing::{debug, error, info, warn};

/// Interval for logging the recorded message count.
const LOG_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Disconnected,
    Connecting,
    Connected,
}

/// How the index counter was seeded at startup.
#[derive(Debug)]
pub enum Resume {
    Fresh,
    Continue { next_index: u64 },
    /// The tail could not be read; counting restarts at 0 and indices may
    /// collide with entries from an earlier session.
    CorruptTail(Error),
    /// The log exists but could not be read at all.
    Unreadable(Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecorderStats {
    pub recorded: u64,
    pub dropped: u64,
}

pub struct Recorder {
    log: DurableLog,
    subscription: String,
    next_index: u64,
    state: RecorderState,
    stats: RecorderStats,
}

impl Recorder {
    pub fn new(log: DurableLog, base_topic: &str) -> Self {
        Self {
            log,
            subscription: subtree_pattern(base_topic),
            next_index: 0,
            state: RecorderState::Disconnected,
            stats: RecorderStats::default(),
        }
    }

    /// Seeds the index counter from the log. Call before accepting
    /// messages.
    pub fn resume(&mut self) -> Resume {
        match self.log.recover_last_index() {
            Ok(0) => {
                self.next_index = 0;
                info!(path = %self.log.path().display(), "starting new log");
                Resume::Fresh
            }
            Ok(next_index) => {
                self.next_index = next_index;
                info!(path = %self.log.path().display(), next_index, "resuming log");
                Resume::Continue { next_index }
            }
            Err(e @ Error::CorruptTail { .. }) => {
                self.next_index = 0;
                warn!(error = %e, "cannot resume index; restarting at 0, indices may repeat");
                Resume::CorruptTail(e)
            }
            Err(e) => {
                self.next_index = 0;
                error!(error = %e, "cannot read log for resume; restarting at 0");
                Resume::Unreadable(e)
            }
        }
    }

    /// Decodes, stamps and appends one message. The counter only advances
    /// once the entry is durable.
    pub fn record(&mut self, topic: &str, raw_payload: &[u8]) -> Result<LogEntry> {
        let payload = serde_json::from_slice(raw_payload).map_err(|source| Error::Decode {
            topic: topic.to_string(),
            source,
        })?;
        let entry = LogEntry {
            timestamp: now_unix_secs(),
            topic: topic.to_string(),
            payload,
            message_index: self.next_index,
        };
        self.log.append(&entry)?;
        self.next_index += 1;
        self.stats.recorded += 1;
        Ok(entry)
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }
}

impl ConnectionHandler for Recorder {
    fn on_connecting(&mut self) {
        self.state = RecorderState::Connecting;
    }

    fn on_connected(&mut self, broker: &dyn Broker) {
        self.state = RecorderState::Connected;
        match broker.subscribe(&self.subscription) {
            Ok(()) => info!(pattern = %self.subscription, "recorder subscribed"),
            Err(e) => error!(pattern = %self.subscription, error = %e, "subscribe failed"),
        }
    }

    fn on_disconnected(&mut self) {
        self.state = RecorderState::Disconnected;
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        match self.record(topic, payload) {
            Ok(entry) => {
                debug!(topic, index = entry.message_index, "recorded");
                if self.stats.recorded % LOG_INTERVAL == 0 {
                    info!(recorded = self.stats.recorded, dropped = self.stats.dropped, "recording");
                }
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!(topic, index = self.next_index, error = %e, "dropping message");
            }
        }
    }
}
