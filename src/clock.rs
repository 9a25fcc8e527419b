// =============================================================================
// Clock primitive — single injected source of "now" for the whole engine
// =============================================================================
//
// DTE computation, phase scheduling, and monitor ticks all need a notion of
// "now" in the market's local timezone. Rather than scattering `Local::now()`
// calls through the Scheduler, Risk Engine, and Monitor, every one of those
// takes a `Arc<dyn Clock>`. Production wires `SystemClock`; tests wire
// `FixedClock` pinned to a deterministic instant so DTE and scheduling tests
// never race the wall clock.
// =============================================================================

use chrono::{DateTime, Local, TimeZone};
use parking_lot::RwLock;

/// Source of "now", injected everywhere the engine needs the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Real wall-clock time in the process's local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock pinned to a fixed instant, mutable so a test can advance it
/// explicitly between assertions without waiting on real time.
pub struct FixedClock {
    instant: RwLock<DateTime<Local>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Local>) -> Self {
        Self {
            instant: RwLock::new(instant),
        }
    }

    /// Convenience constructor from a `YYYY-MM-DD HH:MM:SS` string in the
    /// local timezone, for terse test setup.
    pub fn at(s: &str) -> Self {
        let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .expect("FixedClock::at expects \"YYYY-MM-DD HH:MM:SS\"");
        let instant = Local
            .from_local_datetime(&naive)
            .single()
            .expect("ambiguous or invalid local datetime");
        Self::new(instant)
    }

    pub fn set(&self, instant: DateTime<Local>) {
        *self.instant.write() = instant;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.instant.write();
        *guard += duration;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.instant.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_pinned_instant() {
        let clock = FixedClock::at("2026-03-05 09:31:00");
        let now = clock.now();
        assert_eq!(now.format("%H:%M").to_string(), "09:31");
    }

    #[test]
    fn fixed_clock_advance_moves_forward() {
        let clock = FixedClock::at("2026-03-05 09:31:00");
        clock.advance(chrono::Duration::minutes(30));
        assert_eq!(clock.now().format("%H:%M").to_string(), "10:01");
    }
}
