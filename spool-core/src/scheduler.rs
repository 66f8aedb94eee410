/*!
Flush policy: when to drain memory to disk and when to upload.

Two trigger edges feed one flush action. Crossing the chunk limit drains the
memory buffer toward disk at once; a timer fire starts a full flush. Only one
flush may be in flight; a tick that lands during a flush is coalesced and the
next tick picks up the delta.
*/

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::{Result, SpoolError};

/// What the event loop should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// Nothing to do
    Idle,
    /// Move the memory buffer into the staging file
    Drain,
    /// Start a full flush (drain, stage, upload)
    Flush,
    /// A flush is already running; this tick is skipped
    Coalesced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Flushing,
}

/// Flush state machine owned by the sink's event loop
#[derive(Debug)]
pub struct FlushScheduler {
    chunk_limit: usize,
    state: State,
}

impl FlushScheduler {
    pub fn new(chunk_limit: usize) -> Self {
        Self {
            chunk_limit,
            state: State::Idle,
        }
    }

    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    pub fn is_flushing(&self) -> bool {
        self.state == State::Flushing
    }

    /// Decide after a record was appended and the buffer holds `buffered` bytes.
    ///
    /// Drains are allowed while a flush is in flight; ingestion never waits.
    pub fn record_appended(&self, buffered: usize) -> FlushDecision {
        if buffered > self.chunk_limit {
            FlushDecision::Drain
        } else {
            FlushDecision::Idle
        }
    }

    /// Decide after the periodic timer fired
    pub fn timer_fired(&mut self) -> FlushDecision {
        match self.state {
            State::Idle => {
                self.state = State::Flushing;
                FlushDecision::Flush
            }
            State::Flushing => FlushDecision::Coalesced,
        }
    }

    /// The in-flight flush finished (or could not be started)
    pub fn flush_finished(&mut self) {
        self.state = State::Idle;
    }
}

/// Source of periodic flush ticks
#[async_trait]
pub trait FlushTimer: Send {
    /// Wait for the next tick
    async fn fire(&mut self);
}

/// Tokio interval timer
///
/// The first tick comes one full period after creation, and ticks missed
/// while the loop was busy are delayed rather than replayed in a burst.
#[derive(Debug)]
pub struct IntervalTimer {
    interval: Interval,
}

impl IntervalTimer {
    /// Create a timer firing every `period`
    ///
    /// # Errors
    /// Returns a config error for a zero period.
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(SpoolError::config(
                "Flush interval must be greater than zero",
            ));
        }
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Self { interval })
    }
}

#[async_trait]
impl FlushTimer for IntervalTimer {
    async fn fire(&mut self) {
        self.interval.tick().await;
    }
}

/// Ticks sent by an external scheduler. A closed channel never fires again.
#[async_trait]
impl FlushTimer for mpsc::Receiver<()> {
    async fn fire(&mut self) {
        if self.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_drain() {
        let scheduler = FlushScheduler::new(1024);
        assert_eq!(scheduler.record_appended(500), FlushDecision::Idle);
        assert_eq!(scheduler.record_appended(1000), FlushDecision::Idle);
        assert_eq!(scheduler.record_appended(1024), FlushDecision::Idle);
        assert_eq!(scheduler.record_appended(1500), FlushDecision::Drain);
    }

    #[test]
    fn test_tick_during_flush_is_coalesced() {
        let mut scheduler = FlushScheduler::new(1024);

        assert_eq!(scheduler.timer_fired(), FlushDecision::Flush);
        assert!(scheduler.is_flushing());
        assert_eq!(scheduler.timer_fired(), FlushDecision::Coalesced);
        assert_eq!(scheduler.timer_fired(), FlushDecision::Coalesced);

        scheduler.flush_finished();
        assert!(!scheduler.is_flushing());
        assert_eq!(scheduler.timer_fired(), FlushDecision::Flush);
    }

    #[test]
    fn test_drain_allowed_while_flushing() {
        let mut scheduler = FlushScheduler::new(10);
        assert_eq!(scheduler.timer_fired(), FlushDecision::Flush);
        assert_eq!(scheduler.record_appended(11), FlushDecision::Drain);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_timer_skips_immediate_tick() {
        let mut timer = IntervalTimer::new(Duration::from_secs(60)).unwrap();
        let started = Instant::now();

        timer.fire().await;
        assert!(started.elapsed() >= Duration::from_secs(60));

        timer.fire().await;
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_interval_timer_rejects_zero_period() {
        match IntervalTimer::new(Duration::ZERO) {
            Err(SpoolError::Config(msg)) => assert!(msg.contains("greater than zero")),
            other => panic!("Expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_channel_timer() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        tx.send(()).await.unwrap();
        rx.fire().await;

        drop(tx);
        let closed = tokio::time::timeout(Duration::from_millis(20), rx.fire()).await;
        assert!(closed.is_err());
    }
}
