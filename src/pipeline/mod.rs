// =============================================================================
// Pipeline (C7) — the five daily phase procedures
// =============================================================================
//
// Each phase is a single asynchronous procedure taking a shared
// `PipelineContext` and emitting progress events as it goes (spec §4.7).
// Phases are idempotent at day granularity except Phase 3, whose inserts
// are irreversible (spec §9 "Phase idempotency vs. partial failure").
// =============================================================================

mod phase1_intel;
mod phase2_analyze;
mod phase3_execute;
mod phase4_eod;
mod phase5_reflect;

pub use phase1_intel::run_phase1;
pub use phase2_analyze::run_phase2;
pub use phase3_execute::run_phase3;
pub use phase4_eod::run_phase4;
pub use phase5_reflect::run_phase5;

use std::sync::Arc;

use crate::ai_gateway::AiGateway;
use crate::clock::Clock;
use crate::decisions::DecisionLog;
use crate::events::EventBus;
use crate::market_data::MarketDataGateway;
use crate::store::Store;

/// Shared handles every phase needs. Cheap to clone; every field is itself
/// `Clone` (an `Arc`, a pooled connection, or a reqwest client).
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Store,
    pub market_data: MarketDataGateway,
    pub ai: AiGateway,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    pub decisions: DecisionLog,
}

/// Run the named phase (1-5), dispatched by the scheduler trigger or a
/// Control Surface `runPhase` call. Any phase number outside 1..=5 is a
/// caller bug, not a recoverable condition.
pub async fn run_phase(ctx: &PipelineContext, phase: u8) -> anyhow::Result<crate::types::PhaseOutcome> {
    match phase {
        1 => run_phase1(ctx).await,
        2 => run_phase2(ctx).await.map(|r| r.outcome),
        3 => run_phase3(ctx).await,
        4 => run_phase4(ctx).await,
        5 => run_phase5(ctx).await,
        other => anyhow::bail!("unknown phase number {other}"),
    }
}
