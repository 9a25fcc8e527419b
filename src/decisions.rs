// =============================================================================
// Decision audit trail — bounded ring buffer of Phase 3 per-pick outcomes
// =============================================================================
//
// Phase 3 evaluates every pick against a sequence of guardrails (duplicate
// ticker, sector cap, quote availability, strategy/DTE/spread filters,
// premium floor, daily risk budget, margin cap) and either opens a trade or
// skips it. Operators watching the Control Surface want to see *why* a pick
// was skipped without grepping logs, so each outcome is recorded here and
// surfaced over `GET /api/v1/decisions`. Bounded the same way the Event Bus
// is lossy rather than unbounded: old decisions fall off the front once the
// buffer fills, there is no requirement that every decision ever made be
// retrievable.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;

const MAX_DECISIONS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub ticker: String,
    pub opened: bool,
    pub reason: String,
    pub at: DateTime<Local>,
}

/// Cheap to clone; shares the same backing buffer everywhere it's cloned,
/// the same way `EventBus` shares its broadcast channel.
#[derive(Clone)]
pub struct DecisionLog {
    records: Arc<RwLock<VecDeque<DecisionRecord>>>,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_DECISIONS))),
        }
    }
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ticker: impl Into<String>, opened: bool, reason: impl Into<String>, at: DateTime<Local>) {
        let mut records = self.records.write();
        if records.len() >= MAX_DECISIONS {
            records.pop_front();
        }
        records.push_back(DecisionRecord {
            ticker: ticker.into(),
            opened,
            reason: reason.into(),
            at,
        });
    }

    /// Most recent decisions first.
    pub fn recent(&self) -> Vec<DecisionRecord> {
        self.records.read().iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Local> {
        FixedAt::at("2026-03-05 09:31:00")
    }

    struct FixedAt;
    impl FixedAt {
        fn at(s: &str) -> DateTime<Local> {
            use chrono::TimeZone;
            let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
            Local.from_local_datetime(&naive).single().unwrap()
        }
    }

    #[test]
    fn records_are_returned_most_recent_first() {
        let log = DecisionLog::new();
        log.record("AAPL", true, "opened", now());
        log.record("MSFT", false, "duplicate open ticker", now());
        let recent = log.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].ticker, "MSFT");
        assert_eq!(recent[1].ticker, "AAPL");
    }

    #[test]
    fn caps_at_max_decisions_dropping_the_oldest() {
        let log = DecisionLog::new();
        for i in 0..(MAX_DECISIONS + 10) {
            log.record(format!("T{i}"), false, "test", now());
        }
        let recent = log.recent();
        assert_eq!(recent.len(), MAX_DECISIONS);
        assert_eq!(recent.last().unwrap().ticker, "T10");
        assert_eq!(recent[0].ticker, format!("T{}", MAX_DECISIONS + 9));
    }
}
