// =============================================================================
// Clock & Scheduler (C2) — five named weekday jobs plus a monitor tick
// =============================================================================
//
// A singleton driver task owns five phase triggers and one monitor tick,
// each a `tokio::time::interval`-style loop that fires once a minute and
// checks whether "now" matches its configured local time. `start` replaces
// any previously running jobs; `stop` cancels everything.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Datelike, Timelike, Weekday};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::clock::Clock;

/// Which trigger fired, dispatched to the pipeline by `main.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Phase(u8),
    MonitorTick,
}

/// Local HH:MM trigger times for the five named jobs (spec §4.2).
#[derive(Debug, Clone)]
pub struct ScheduleTimes {
    pub intel_at: (u32, u32),
    pub analyze_at: (u32, u32),
    pub execute_at: (u32, u32),
    pub eod_at: (u32, u32),
    pub reflect_at: (u32, u32),
    pub monitor_interval: Duration,
}

impl Default for ScheduleTimes {
    fn default() -> Self {
        Self {
            intel_at: (6, 0),
            analyze_at: (7, 0),
            execute_at: (9, 31),
            eod_at: (16, 1),
            reflect_at: (16, 30),
            monitor_interval: Duration::from_secs(30),
        }
    }
}

fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    Some((h.trim().parse().ok()?, m.trim().parse().ok()?))
}

impl ScheduleTimes {
    pub fn with_overrides(
        intel_at: &str,
        analyze_at: &str,
        execute_at: &str,
        eod_at: &str,
        reflect_at: &str,
        monitor_interval_sec: u64,
    ) -> Self {
        let defaults = Self::default();
        Self {
            intel_at: parse_hhmm(intel_at).unwrap_or(defaults.intel_at),
            analyze_at: parse_hhmm(analyze_at).unwrap_or(defaults.analyze_at),
            execute_at: parse_hhmm(execute_at).unwrap_or(defaults.execute_at),
            eod_at: parse_hhmm(eod_at).unwrap_or(defaults.eod_at),
            reflect_at: parse_hhmm(reflect_at).unwrap_or(defaults.reflect_at),
            monitor_interval: Duration::from_secs(monitor_interval_sec.max(1)),
        }
    }
}

/// Weekdays only, 09:30-16:00 local, inclusive at both ends (spec §4.2
/// "Market hours").
pub fn is_market_hours(clock: &dyn Clock) -> bool {
    let now = clock.now();
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let minute_of_day = now.hour() * 60 + now.minute();
    let open = 9 * 60 + 30;
    let close = 16 * 60;
    minute_of_day >= open && minute_of_day <= close
}

fn is_weekday(clock: &dyn Clock) -> bool {
    !matches!(clock.now().weekday(), Weekday::Sat | Weekday::Sun)
}

fn matches_time(clock: &dyn Clock, target: (u32, u32)) -> bool {
    let now = clock.now();
    is_weekday(clock) && now.hour() == target.0 && now.minute() == target.1
}

/// Singleton scheduler: `start` spawns the driver loop and is idempotent
/// (a second call cancels the first); `stop` cancels everything (spec §4.2
/// "the scheduler is a singleton").
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    times: ScheduleTimes,
    handle: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, times: ScheduleTimes) -> Self {
        Self {
            clock,
            times,
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the driver loop, sending one `Trigger` per matched minute.
    /// Replaces any previously running loop (spec §4.2 "`start` is
    /// idempotent and replaces any prior jobs").
    pub async fn start(&self, tx: mpsc::UnboundedSender<Trigger>) {
        self.stop().await;
        self.running.store(true, Ordering::SeqCst);

        let clock = self.clock.clone();
        let times = self.times.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut minute_ticker = interval(Duration::from_secs(60));
            let mut monitor_ticker = interval(times.monitor_interval);
            let mut last_fired: Option<(u8, u32, u32)> = None;

            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = minute_ticker.tick() => {
                        let now = clock.now();
                        let key = (now.hour(), now.minute());
                        for (phase, target) in [
                            (1u8, times.intel_at),
                            (2u8, times.analyze_at),
                            (3u8, times.execute_at),
                            (4u8, times.eod_at),
                            (5u8, times.reflect_at),
                        ] {
                            if matches_time(clock.as_ref(), target) {
                                let fired_key = (phase, key.0, key.1);
                                if last_fired == Some(fired_key) {
                                    continue;
                                }
                                last_fired = Some(fired_key);
                                if tx.send(Trigger::Phase(phase)).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    _ = monitor_ticker.tick() => {
                        if tx.send(Trigger::MonitorTick).is_err() {
                            return;
                        }
                    }
                }
            }
            info!("scheduler loop stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Cancel all jobs and the monitor (spec §4.2 "`stop` cancels all jobs
    /// and the monitor").
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[test]
    fn market_hours_excludes_weekends() {
        let clock = FixedClock::at("2026-03-07 10:00:00"); // a Saturday
        assert!(!is_market_hours(&clock));
    }

    #[test]
    fn market_hours_includes_open_and_close_boundaries() {
        let open = FixedClock::at("2026-03-05 09:30:00");
        let close = FixedClock::at("2026-03-05 16:00:00");
        assert!(is_market_hours(&open));
        assert!(is_market_hours(&close));
    }

    #[test]
    fn market_hours_excludes_before_open_and_after_close() {
        let before = FixedClock::at("2026-03-05 09:29:00");
        let after = FixedClock::at("2026-03-05 16:01:00");
        assert!(!is_market_hours(&before));
        assert!(!is_market_hours(&after));
    }

    #[test]
    fn schedule_times_parses_overrides() {
        let times = ScheduleTimes::with_overrides("05:45", "07:00", "09:31", "16:01", "16:30", 15);
        assert_eq!(times.intel_at, (5, 45));
        assert_eq!(times.monitor_interval, Duration::from_secs(15));
    }

    #[test]
    fn schedule_times_falls_back_to_default_on_malformed_override() {
        let times = ScheduleTimes::with_overrides("garbage", "07:00", "09:31", "16:01", "16:30", 30);
        assert_eq!(times.intel_at, ScheduleTimes::default().intel_at);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_cancels() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at("2026-03-05 09:31:00"));
        let scheduler = Scheduler::new(clock, ScheduleTimes::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler.start(tx.clone()).await;
        assert!(scheduler.is_running());
        scheduler.start(tx).await;
        assert!(scheduler.is_running());
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
