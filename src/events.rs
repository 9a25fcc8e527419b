// =============================================================================
// Event Bus (C10) — one-way, lossy, non-blocking broadcast of engine events
// =============================================================================
//
// A single `tokio::sync::broadcast` channel carries every event kind as one
// enum. Broadcasting never blocks the caller and never waits on a reader:
// a send with no subscribers, or a slow subscriber that falls behind the
// channel capacity, simply drops messages. Subscribers are pushed events as
// they happen rather than polling a version counter.
// =============================================================================

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::store::Trade;

/// One observable occurrence inside the engine (spec §4.10).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Event {
    #[serde(rename = "autonomous-status")]
    Status(StatusEvent),
    #[serde(rename = "autonomous-progress")]
    Progress(ProgressEvent),
    #[serde(rename = "autonomous-trade")]
    Trade(TradeEvent),
    #[serde(rename = "autonomous-position-update")]
    PositionUpdate(PositionUpdateEvent),
    #[serde(rename = "autonomous-log")]
    Log(LogEvent),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub enabled: bool,
    pub running: bool,
    pub open_position_count: i64,
    pub current_value: f64,
    pub starting_balance: f64,
    pub total_pnl: f64,
    pub last_monitor_tick: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Starting,
    Fetching,
    Discovery,
    Grok,
    Candidates,
    Data,
    Ai,
    Complete,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub phase: u8,
    pub status: ProgressStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Opened,
    Closed,
    StopLoss,
    ProfitTarget,
    DteManage,
    ManualClose,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeEvent {
    pub action: TradeAction,
    pub trade_id: i64,
    pub trade: Trade,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionUpdateEvent {
    pub trade_id: i64,
    pub current_price: f64,
    pub pnl_per_contract: f64,
    pub pnl_percent: f64,
    pub pnl_total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Fan-out bus: cheap to clone, every clone shares the same underlying
/// channel. Capacity bounds how far a slow subscriber may lag before it
/// starts missing events (broadcast's documented lossy behavior).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. Never blocks; dropped silently if there are no
    /// subscribers (spec §4.10 "Core logic MUST never block on
    /// broadcasting").
    pub fn publish(&self, event: Event) {
        if self.sender.send(event).is_err() {
            trace!("event bus has no subscribers, dropping event");
        }
    }

    pub fn status(&self, event: StatusEvent) {
        self.publish(Event::Status(event));
    }

    pub fn progress(&self, phase: u8, status: ProgressStatus, message: impl Into<String>) {
        self.publish(Event::Progress(ProgressEvent {
            phase,
            status,
            message: message.into(),
        }));
    }

    pub fn trade(&self, action: TradeAction, trade: Trade) {
        self.publish(Event::Trade(TradeEvent {
            action,
            trade_id: trade.id,
            trade,
        }));
    }

    pub fn position_update(&self, event: PositionUpdateEvent) {
        self.publish(Event::PositionUpdate(event));
    }

    pub fn log(&self, message: impl Into<String>, now: DateTime<Local>) {
        self.publish(Event::Log(LogEvent {
            message: message.into(),
            timestamp: now,
        }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
