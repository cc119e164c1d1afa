use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

pub const LOW_TIME_THRESHOLD_SECS: u64 = 60;

/// Remaining game time, derived from the authoritative start timestamp.
/// Monotonically non-increasing for fixed inputs, clamped at zero.
pub fn remaining_seconds(started_at: DateTime<Utc>, total_duration: u64, now: DateTime<Utc>) -> u64 {
    let elapsed = (now - started_at).num_seconds().max(0) as u64;
    total_duration.saturating_sub(elapsed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockEvent {
    Tick { remaining: u64 },
    /// Fired at most once per game, when remaining time first crosses the
    /// low-time threshold.
    LowTime { remaining: u64 },
    /// Terminal. The clock stops ticking after emitting this.
    Deadline,
}

/// Per-game countdown. Each tick recomputes the remaining time from
/// `started_at`, so a clock constructed mid-game (page reload) is correct
/// immediately instead of assuming a full duration.
pub struct GameClock {
    started_at: DateTime<Utc>,
    total_duration: u64,
    low_time_threshold: u64,
    low_time_fired: Arc<AtomicBool>,
}

impl GameClock {
    pub fn new(started_at: DateTime<Utc>, total_duration: u64) -> Self {
        Self {
            started_at,
            total_duration,
            low_time_threshold: LOW_TIME_THRESHOLD_SECS,
            low_time_fired: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn with_low_time_threshold(mut self, secs: u64) -> Self {
        self.low_time_threshold = secs;
        self
    }

    /// Share the low-time latch with the caller. The latch lives outside
    /// the tick loop: a clock rebuilt after a reconnect keeps the guarantee
    /// that the warning fires at most once per game.
    pub fn with_low_time_latch(mut self, latch: Arc<AtomicBool>) -> Self {
        self.low_time_fired = latch;
        self
    }

    pub fn low_time_latch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.low_time_fired)
    }

    /// Spawn the tick loop. Emits one `Tick` per second while time remains,
    /// `LowTime` once when the threshold is first crossed, and exactly one
    /// `Deadline` when remaining reaches zero, after which the channel
    /// closes.
    pub fn start(self) -> mpsc::Receiver<ClockEvent> {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let remaining =
                    remaining_seconds(self.started_at, self.total_duration, Utc::now());

                if remaining == 0 {
                    let _ = tx.send(ClockEvent::Deadline).await;
                    return;
                }

                if remaining <= self.low_time_threshold
                    && !self.low_time_fired.swap(true, Ordering::SeqCst)
                    && tx.send(ClockEvent::LowTime { remaining }).await.is_err()
                {
                    return;
                }

                if tx.send(ClockEvent::Tick { remaining }).await.is_err() {
                    return;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn remaining_is_non_increasing_and_never_negative() {
        let start = Utc::now();
        let mut last = u64::MAX;
        for elapsed in [0i64, 1, 450, 899, 900, 901, 10_000] {
            let remaining = remaining_seconds(start, 900, start + ChronoDuration::seconds(elapsed));
            assert!(remaining <= last);
            last = remaining;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn remaining_before_start_is_full_duration() {
        let start = Utc::now();
        // an authority clock slightly ahead of ours must not overflow
        let remaining = remaining_seconds(start, 900, start - ChronoDuration::seconds(3));
        assert_eq!(remaining, 900);
    }

    #[tokio::test]
    async fn deadline_fires_exactly_once_then_channel_closes() {
        let clock = GameClock::new(Utc::now(), 1);
        let mut events = clock.start();

        let mut deadlines = 0;
        while let Some(event) = events.recv().await {
            if event == ClockEvent::Deadline {
                deadlines += 1;
            }
        }
        assert_eq!(deadlines, 1);
    }

    #[tokio::test]
    async fn clock_constructed_after_deadline_emits_deadline_immediately() {
        let started_at = Utc::now() - ChronoDuration::seconds(905);
        let clock = GameClock::new(started_at, 900);
        let mut events = clock.start();

        assert_eq!(events.recv().await, Some(ClockEvent::Deadline));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn low_time_fires_once_when_threshold_crossed() {
        let clock = GameClock::new(Utc::now(), 3).with_low_time_threshold(2);
        let mut events = clock.start();

        let mut low_time = 0;
        while let Some(event) = events.recv().await {
            if matches!(event, ClockEvent::LowTime { .. }) {
                low_time += 1;
            }
        }
        assert_eq!(low_time, 1);
    }

    #[tokio::test]
    async fn low_time_fires_immediately_when_constructed_inside_threshold() {
        // reload analogue: 850 of 900 seconds already elapsed
        let started_at = Utc::now() - ChronoDuration::seconds(850);
        let clock = GameClock::new(started_at, 900);
        let mut events = clock.start();

        let first = events.recv().await.unwrap();
        match first {
            ClockEvent::LowTime { remaining } => assert!(remaining <= 60),
            other => panic!("expected LowTime first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shared_latch_suppresses_duplicate_low_time_across_rebuilds() {
        let latch = Arc::new(AtomicBool::new(false));

        let first = GameClock::new(Utc::now(), 2)
            .with_low_time_threshold(10)
            .with_low_time_latch(Arc::clone(&latch));
        let mut events = first.start();
        let mut saw_low_time = false;
        while let Some(event) = events.recv().await {
            if matches!(event, ClockEvent::LowTime { .. }) {
                saw_low_time = true;
            }
        }
        assert!(saw_low_time);

        // rebuilt clock (same game, same latch) must not refire
        let second = GameClock::new(Utc::now(), 1)
            .with_low_time_threshold(10)
            .with_low_time_latch(latch);
        let mut events = second.start();
        while let Some(event) = events.recv().await {
            assert!(!matches!(event, ClockEvent::LowTime { .. }));
        }
    }
}
