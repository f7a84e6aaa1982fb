//! Replayer: republishes a recorded log with the original inter-message
//! timing, scaled by a speed multiplier.
//!
//! Each entry's wake time is computed from one absolute origin (the replay
//! start paired with the first entry's timestamp), never from the previous
//! publish, so jitter on one message does not shift the rest.
use crate::broker::{Broker, ConnectionStatus};
use crate::clock::{Shutdown, sleep_until};
use crate::error::{Error, Result};
use crate::record::DurableLog;
use crate::topic::TopicRewrite;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Rejects speed multipliers that are not positive and finite.
pub fn validate_speed(speed_multiplier: f64) -> Result<()> {
    if speed_multiplier > 0.0 && speed_multiplier.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "speed multiplier must be a positive number, got {speed_multiplier}"
        )))
    }
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub recording_base: String,
    pub replay_base: String,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub published: u64,
    pub cancelled: bool,
    pub elapsed: Duration,
}

pub struct Replayer<'a, B: Broker + ?Sized> {
    broker: &'a B,
    status: &'a ConnectionStatus,
    log: DurableLog,
    rewrite: TopicRewrite,
    connect_timeout: Duration,
    shutdown: Shutdown,
}

impl<'a, B: Broker + ?Sized> Replayer<'a, B> {
    pub fn new(broker: &'a B, status: &'a ConnectionStatus, log: DurableLog, opts: ReplayOptions) -> Self {
        Self {
            broker,
            status,
            log,
            rewrite: TopicRewrite::new(opts.recording_base, opts.replay_base),
            connect_timeout: opts.connect_timeout,
            shutdown: Shutdown::new(),
        }
    }

    /// Uses `shutdown` to abandon the replay between entries or mid-sleep.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replays the whole log, then asks the broker to disconnect.
    ///
    /// `speed_multiplier` must be positive and finite; 1.0 keeps the
    /// recorded timing, 2.0 halves every delay. It is validated before any
    /// wait or file access.
    pub fn start(&self, speed_multiplier: f64) -> Result<ReplaySummary> {
        validate_speed(speed_multiplier)?;
        if !self.status.wait_connected(self.connect_timeout, &self.shutdown) {
            if self.shutdown.is_triggered() {
                info!("replay cancelled before connecting");
                return Ok(ReplaySummary {
                    published: 0,
                    cancelled: true,
                    elapsed: Duration::ZERO,
                });
            }
            return Err(Error::NotConnected(self.connect_timeout));
        }

        let outcome = self.publish_all(speed_multiplier);
        if let Err(e) = self.broker.disconnect() {
            warn!(error = %e, "disconnect after replay failed");
        }
        outcome
    }

    fn publish_all(&self, speed_multiplier: f64) -> Result<ReplaySummary> {
        let begin = Instant::now();
        let mut first_message_ts: Option<f64> = None;
        let mut published = 0u64;
        let summary = |published, cancelled| ReplaySummary {
            published,
            cancelled,
            elapsed: begin.elapsed(),
        };

        for entry in self.log.read_all()? {
            let entry = entry?;
            let origin = *first_message_ts.get_or_insert(entry.timestamp);
            // if the recording's clock stepped backwards, publish immediately
            let delay = ((entry.timestamp - origin) / speed_multiplier).max(0.0);
            let wake = Duration::try_from_secs_f64(delay)
                .ok()
                .and_then(|d| begin.checked_add(d))
                .ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "delay of {delay}s for entry {} is out of range",
                        entry.message_index
                    ))
                })?;

            if !sleep_until(wake, &self.shutdown) {
                info!(published, "replay cancelled");
                return Ok(summary(published, true));
            }

            let topic = self.rewrite.apply(&entry.topic);
            let payload = serde_json::to_vec(&entry.payload)?;
            self.broker.publish(&topic, payload)?;
            published += 1;
            debug!(topic = %topic, index = entry.message_index, delay, "published");
        }

        let done = summary(published, false);
        info!(published, elapsed = ?done.elapsed, path = %self.log.path().display(), "replay complete");
        Ok(done)
    }
}
