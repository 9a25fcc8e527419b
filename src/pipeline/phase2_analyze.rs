// =============================================================================
// Phase 2 — Analyze
// =============================================================================
//
// Build a candidate pool from today's scan plus a curated list, fetch
// prices, ask the analysis model for picks, parse them, and persist the
// picks back onto today's MarketScan (spec §4.7 "Phase 2 — Analyze").
// =============================================================================

use rand::seq::SliceRandom;
use tracing::warn;

use crate::config::ConfigSnapshot;
use crate::events::ProgressStatus;
use crate::parsers::{parse_selection, ParsedPick};
use crate::prompts::build_selection_prompt;
use crate::risk;
use crate::types::PhaseOutcome;

use super::{run_phase1, PipelineContext};

/// Truncate the candidate pool to this many tickers before quoting (spec
/// §4.7 "union ... shuffle; truncate to 40").
const CANDIDATE_POOL_LIMIT: usize = 40;

pub struct Phase2Result {
    pub outcome: PhaseOutcome,
    pub picks: Vec<ParsedPick>,
}

pub async fn run_phase2(ctx: &PipelineContext) -> anyhow::Result<Phase2Result> {
    ctx.events.progress(2, ProgressStatus::Starting, "analyze: starting");

    let today = ctx.clock.now().date_naive();
    let scan = match ctx.store.get_market_scan(today).await? {
        Some(scan) => scan,
        None => {
            ctx.events
                .progress(2, ProgressStatus::Fetching, "analyze: no scan today, running intel first");
            run_phase1(ctx).await?;
            match ctx.store.get_market_scan(today).await? {
                Some(scan) => scan,
                None => {
                    ctx.events
                        .progress(2, ProgressStatus::Error, "analyze: intel still produced no scan");
                    return Ok(Phase2Result {
                        outcome: PhaseOutcome::Error,
                        picks: Vec::new(),
                    });
                }
            }
        }
    };

    let config = ConfigSnapshot::load(&ctx.store).await?;

    ctx.events
        .progress(2, ProgressStatus::Candidates, "analyze: building candidate pool");
    let mut pool: Vec<String> = scan.trending_list();
    for ticker in crate::sector_map::CURATED_CANDIDATES {
        let ticker = ticker.to_string();
        if !pool.contains(&ticker) {
            pool.push(ticker);
        }
    }
    pool.shuffle(&mut rand::thread_rng());
    pool.truncate(CANDIDATE_POOL_LIMIT);

    ctx.events
        .progress(2, ProgressStatus::Data, "analyze: fetching candidate quotes");
    let quotes = ctx.market_data.get_quotes_batch(&pool).await;
    if quotes.is_empty() {
        warn!("analyze: no candidate returned a price, proceeding with an empty selection call");
    }
    let priced_candidates: Vec<String> = quotes.iter().map(|q| q.symbol.clone()).collect();

    let performance_context = ctx.store.build_performance_context().await?;
    let open_trades = ctx.store.get_open_trades().await?;
    let margin = risk::portfolio_margin(&open_trades, config.paper_balance, config.max_margin_pct);
    let slots_available = (config.max_positions - open_trades.len() as i64).max(0);

    ctx.events
        .progress(2, ProgressStatus::Ai, "analyze: calling analysis model");
    let prompt = build_selection_prompt(
        &priced_candidates,
        &scan.market_mood,
        &scan.raw_text,
        &performance_context,
        &config.allowed_strategies,
        config.min_dte,
        config.max_dte,
        config.min_spread_width,
        slots_available,
        config.max_per_sector,
        margin.total,
        margin.available,
    );

    let response = ctx.ai.call(&prompt, &config.deepseek_model, 2000).await;
    let picks = match response {
        Ok(text) => parse_selection(&text),
        Err(e) => {
            warn!(error = %e, "analyze: selection model call failed, treating as zero picks");
            Vec::new()
        }
    };

    let picks_json = serde_json::to_string(
        &picks
            .iter()
            .map(|p| p.ticker.clone())
            .collect::<Vec<_>>(),
    )
    .unwrap_or_else(|_| "[]".to_string());
    ctx.store.set_market_scan_picks(today, &picks_json).await?;

    ctx.events.progress(
        2,
        ProgressStatus::Complete,
        format!("analyze: {} picks selected", picks.len()),
    );

    Ok(Phase2Result {
        outcome: PhaseOutcome::Complete,
        picks,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ai_gateway::AiGateway;
    use crate::clock::FixedClock;
    use crate::events::EventBus;
    use crate::market_data::MarketDataGateway;
    use crate::store::Store;

    async fn sample_context() -> PipelineContext {
        PipelineContext {
            store: Store::open_in_memory().await.unwrap(),
            market_data: MarketDataGateway::new("http://localhost:1"),
            ai: AiGateway::new("http://localhost:1", std::time::Duration::from_millis(50)),
            events: EventBus::new(16),
            clock: Arc::new(FixedClock::at("2026-03-05 07:00:00")),
            decisions: crate::decisions::DecisionLog::new(),
        }
    }

    #[tokio::test]
    async fn phase2_runs_phase1_when_scan_missing() {
        let ctx = sample_context().await;
        let result = run_phase2(&ctx).await.unwrap();
        assert_eq!(result.outcome, PhaseOutcome::Complete);

        let today = chrono::NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let scan = ctx.store.get_market_scan(today).await.unwrap().unwrap();
        assert!(scan.selected_picks.is_some());
    }

    #[tokio::test]
    async fn phase2_with_no_network_yields_zero_picks_not_an_error() {
        let ctx = sample_context().await;
        let result = run_phase2(&ctx).await.unwrap();
        assert_eq!(result.outcome, PhaseOutcome::Complete);
        assert!(result.picks.is_empty());
    }
}
