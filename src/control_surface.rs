// =============================================================================
// Control Surface (C11) — enable/disable, manual phase run, manual close,
// status snapshot, config read/write
// =============================================================================
//
// Owns the Scheduler and a driver task that turns its `Trigger`s into
// pipeline/monitor runs. Coalescing (spec §5 "overlapping triggers coalesce
// by skipping") is implemented with two `AtomicBool` busy flags rather than
// a lock the driver would block on, so a trigger that arrives mid-run is
// dropped immediately instead of queuing. This is the same role the
// per-subsystem background loops in `main.rs` play, centralized behind one
// start/stop pair instead of scattered `tokio::spawn` blocks.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ConfigSnapshot;
use crate::events::{EventBus, StatusEvent, TradeAction};
use crate::market_data::OptionRight;
use crate::monitor;
use crate::pipeline::{self, PipelineContext};
use crate::scheduler::{ScheduleTimes, Scheduler, Trigger};
use crate::store::{ExitData, Store};
use crate::types::{ExitReason, PhaseOutcome, Strategy};

fn option_right_for(strategy: Strategy) -> OptionRight {
    match strategy {
        Strategy::ShortPut | Strategy::CreditSpread => OptionRight::Put,
        Strategy::CoveredCall => OptionRight::Call,
    }
}

/// Snapshot backing `getStatus`, the REST `status` endpoint, and the
/// periodic `autonomous-status` broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub enabled: bool,
    pub running: bool,
    pub ready: bool,
    pub open_position_count: i64,
    pub current_value: f64,
    pub starting_balance: f64,
    pub total_pnl: f64,
    pub last_monitor_tick: Option<DateTime<Local>>,
}

pub struct ControlSurface {
    ctx: PipelineContext,
    scheduler: Scheduler,
    driver: Mutex<Option<JoinHandle<()>>>,
    phase_busy: Arc<AtomicBool>,
    monitor_busy: Arc<AtomicBool>,
    last_monitor_tick: Arc<RwLock<Option<DateTime<Local>>>>,
}

impl ControlSurface {
    pub fn new(ctx: PipelineContext, times: ScheduleTimes) -> Self {
        Self {
            scheduler: Scheduler::new(ctx.clock.clone(), times),
            ctx,
            driver: Mutex::new(None),
            phase_busy: Arc::new(AtomicBool::new(false)),
            monitor_busy: Arc::new(AtomicBool::new(false)),
            last_monitor_tick: Arc::new(RwLock::new(None)),
        }
    }

    pub fn store(&self) -> &Store {
        &self.ctx.store
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn decisions(&self) -> &crate::decisions::DecisionLog {
        &self.ctx.decisions
    }

    /// Persist `enabled=true` and start the scheduler (spec §4.11 "`enable`
    /// persists `enabled=true` and starts the scheduler").
    pub async fn enable(&self) -> anyhow::Result<()> {
        self.ctx.store.set_config("enabled", "true").await?;
        self.start().await
    }

    /// Persist `enabled=false` and stop the scheduler.
    pub async fn disable(&self) -> anyhow::Result<()> {
        self.ctx.store.set_config("enabled", "false").await?;
        self.stop().await;
        Ok(())
    }

    /// Start the scheduler and driver loop without touching the `enabled`
    /// flag. Refuses if the store failed to initialize (spec §4.1 "Failure:
    /// a disabled or uninitialized Store causes the Control Surface to
    /// report a degraded state and refuses to enable the scheduler").
    pub async fn start(&self) -> anyhow::Result<()> {
        if !self.ctx.store.is_ready().await {
            anyhow::bail!("store is not ready, refusing to start the scheduler");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.scheduler.start(tx).await;
        *self.driver.lock().await = Some(self.spawn_driver(rx));
        info!("control surface: scheduler and driver started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
        if let Some(handle) = self.driver.lock().await.take() {
            handle.abort();
        }
        info!("control surface: scheduler and driver stopped");
    }

    fn spawn_driver(&self, mut rx: mpsc::UnboundedReceiver<Trigger>) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        let phase_busy = self.phase_busy.clone();
        let monitor_busy = self.monitor_busy.clone();
        let last_monitor_tick = self.last_monitor_tick.clone();

        tokio::spawn(async move {
            while let Some(trigger) = rx.recv().await {
                match trigger {
                    Trigger::Phase(phase) => {
                        if phase_busy.swap(true, Ordering::SeqCst) {
                            warn!(phase, "dropping trigger — previous phase still running");
                            continue;
                        }
                        let ctx = ctx.clone();
                        let phase_busy = phase_busy.clone();
                        tokio::spawn(async move {
                            if let Err(e) = pipeline::run_phase(&ctx, phase).await {
                                warn!(phase, error = %e, "phase run failed");
                            }
                            phase_busy.store(false, Ordering::SeqCst);
                        });
                    }
                    Trigger::MonitorTick => {
                        if monitor_busy.swap(true, Ordering::SeqCst) {
                            warn!("dropping monitor tick — previous tick still running");
                            continue;
                        }
                        let ctx = ctx.clone();
                        let monitor_busy = monitor_busy.clone();
                        let last_monitor_tick = last_monitor_tick.clone();
                        tokio::spawn(async move {
                            run_monitor_tick(&ctx, &last_monitor_tick).await;
                            monitor_busy.store(false, Ordering::SeqCst);
                        });
                    }
                }
            }
            info!("control surface driver loop stopped");
        })
    }

    /// Run a phase out of band, regardless of the scheduler clock (spec
    /// §4.11 `runPhase(1..5)`). Shares the scheduled-run busy flag, so a
    /// manual call during an in-flight phase is rejected instead of
    /// clobbering it.
    pub async fn run_phase(&self, phase: u8) -> anyhow::Result<PhaseOutcome> {
        if self.phase_busy.swap(true, Ordering::SeqCst) {
            anyhow::bail!("a phase is already running");
        }
        let result = pipeline::run_phase(&self.ctx, phase).await;
        self.phase_busy.store(false, Ordering::SeqCst);
        result
    }

    /// Close an open trade out of band, at the current mid or zero if
    /// unavailable, recording `exit_reason = manual` (spec §4.11
    /// `manualClose`). A caller-supplied reason is attached to the engine
    /// log, since `exit_reason` on the trade row is a closed enum rather
    /// than free text.
    pub async fn manual_close(&self, trade_id: i64, reason: Option<String>) -> anyhow::Result<()> {
        let Some(trade) = self.ctx.store.get_trade(trade_id).await? else {
            anyhow::bail!("no such trade: {trade_id}");
        };
        if !trade.is_open() {
            anyhow::bail!("trade {trade_id} is not open");
        }

        let current_price = match trade.strategy_enum() {
            Some(strategy) => {
                let right = option_right_for(strategy);
                self.ctx
                    .market_data
                    .get_option_premium(&trade.ticker, &trade.expiry.to_string(), right, trade.strike)
                    .await
                    .ok()
                    .and_then(|p| p.mid)
                    .unwrap_or(0.0)
            }
            None => 0.0,
        };
        let exit_spot = self
            .ctx
            .market_data
            .get_quote(&trade.ticker)
            .await
            .ok()
            .map(|q| q.last)
            .unwrap_or(trade.entry_spot);

        let pnl_dollars = (trade.entry_price - current_price) * 100.0 * trade.contracts as f64;
        let pnl_percent = if trade.entry_price != 0.0 {
            (trade.entry_price - current_price) / trade.entry_price * 100.0
        } else {
            0.0
        };

        self.ctx
            .store
            .close_trade(
                trade_id,
                ExitData {
                    exit_price: current_price,
                    exit_date: self.ctx.clock.now().date_naive(),
                    exit_spot,
                    exit_reason: ExitReason::Manual,
                    pnl_dollars,
                    pnl_percent,
                },
            )
            .await?;

        if let Some(reason) = reason {
            self.ctx
                .events
                .log(format!("manual close of trade {trade_id}: {reason}"), self.ctx.clock.now());
        }
        if let Some(closed) = self.ctx.store.get_trade(trade_id).await? {
            self.ctx.events.trade(TradeAction::ManualClose, closed);
        }
        Ok(())
    }

    pub async fn get_status(&self) -> anyhow::Result<StatusSnapshot> {
        let config = ConfigSnapshot::load(&self.ctx.store).await?;
        let open_trades = self.ctx.store.get_open_trades().await?;
        let equity = self.ctx.store.get_equity_curve().await?;
        let ready = self.ctx.store.is_ready().await;

        Ok(StatusSnapshot {
            enabled: config.enabled,
            running: self.scheduler.is_running(),
            ready,
            open_position_count: open_trades.len() as i64,
            current_value: equity.current_value,
            starting_balance: equity.starting_balance,
            total_pnl: equity.current_value - equity.starting_balance,
            last_monitor_tick: *self.last_monitor_tick.read(),
        })
    }

    /// Publish the current status on the Event Bus (spec §4.10
    /// `autonomous-status`).
    pub async fn broadcast_status(&self) -> anyhow::Result<()> {
        let s = self.get_status().await?;
        self.ctx.events.status(StatusEvent {
            enabled: s.enabled,
            running: s.running,
            open_position_count: s.open_position_count,
            current_value: s.current_value,
            starting_balance: s.starting_balance,
            total_pnl: s.total_pnl,
            last_monitor_tick: s.last_monitor_tick,
        });
        Ok(())
    }
}

async fn run_monitor_tick(ctx: &PipelineContext, last_monitor_tick: &RwLock<Option<DateTime<Local>>>) {
    let config = match ConfigSnapshot::load(&ctx.store).await {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "monitor tick skipped: config unavailable");
            return;
        }
    };
    if let Err(e) = monitor::run_tick(
        &ctx.store,
        &ctx.market_data,
        &ctx.events,
        ctx.clock.as_ref(),
        config.paper_balance,
        config.max_margin_pct,
        config.manage_dte,
    )
    .await
    {
        warn!(error = %e, "monitor tick failed");
    }
    *last_monitor_tick.write() = Some(ctx.clock.now());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ai_gateway::AiGateway;
    use crate::clock::FixedClock;
    use crate::market_data::MarketDataGateway;

    async fn sample_surface() -> ControlSurface {
        let ctx = PipelineContext {
            store: Store::open_in_memory().await.unwrap(),
            market_data: MarketDataGateway::new("http://localhost:1"),
            ai: AiGateway::new("http://localhost:1", Duration::from_millis(50)),
            events: EventBus::new(16),
            clock: Arc::new(FixedClock::at("2026-03-05 09:00:00")),
            decisions: crate::decisions::DecisionLog::new(),
        };
        ControlSurface::new(ctx, ScheduleTimes::default())
    }

    #[tokio::test]
    async fn status_reflects_disabled_default_state() {
        let cs = sample_surface().await;
        let status = cs.get_status().await.unwrap();
        assert!(!status.enabled);
        assert!(!status.running);
        assert!(status.ready);
        assert_eq!(status.open_position_count, 0);
        assert_eq!(status.current_value, status.starting_balance);
    }

    #[tokio::test]
    async fn enable_persists_flag_and_starts_scheduler() {
        let cs = sample_surface().await;
        cs.enable().await.unwrap();
        assert!(cs.get_status().await.unwrap().enabled);
        assert!(cs.get_status().await.unwrap().running);
        cs.disable().await.unwrap();
        assert!(!cs.get_status().await.unwrap().enabled);
        assert!(!cs.get_status().await.unwrap().running);
    }

    #[tokio::test]
    async fn manual_close_rejects_unknown_trade() {
        let cs = sample_surface().await;
        let err = cs.manual_close(999, None).await.unwrap_err();
        assert!(err.to_string().contains("no such trade"));
    }

    #[tokio::test]
    async fn run_phase_rejects_a_call_while_the_busy_flag_is_held() {
        let cs = sample_surface().await;
        cs.phase_busy.store(true, Ordering::SeqCst);
        let err = cs.run_phase(1).await.unwrap_err();
        assert!(err.to_string().contains("already running"));
    }
}
