// =============================================================================
// Phase 1 — Intel
// =============================================================================
//
// Fetch SPY/VIX and trending/most-active lists, ask the sentiment model
// (with search) for a market read, parse it, and upsert today's MarketScan
// (spec §4.7 "Phase 1 — Intel").
// =============================================================================

use tracing::warn;

use crate::ai_gateway::SearchOptions;
use crate::config::ConfigSnapshot;
use crate::events::ProgressStatus;
use crate::parsers::parse_scan;
use crate::prompts::build_scan_prompt;
use crate::store::NewMarketScan;
use crate::types::PhaseOutcome;

use super::PipelineContext;

pub async fn run_phase1(ctx: &PipelineContext) -> anyhow::Result<PhaseOutcome> {
    ctx.events.progress(1, ProgressStatus::Starting, "intel: starting morning scan");

    let config = match ConfigSnapshot::load(&ctx.store).await {
        Ok(c) => c,
        Err(e) => {
            ctx.events
                .progress(1, ProgressStatus::Error, format!("intel: store unavailable: {e}"));
            return Ok(PhaseOutcome::Error);
        }
    };

    ctx.events.progress(1, ProgressStatus::Fetching, "intel: fetching spy/vix");
    let spy_price = ctx.market_data.get_quote("SPY").await.ok().map(|q| q.last);
    let vix = ctx.market_data.get_quote("VIX").await.ok().map(|q| q.last);
    if spy_price.is_none() || vix.is_none() {
        warn!("intel: spy or vix quote unavailable, continuing with partial context");
    }

    let trending = ctx.market_data.get_trending_tickers().await;
    let most_active = ctx.market_data.get_most_active_tickers().await;

    ctx.events
        .progress(1, ProgressStatus::Discovery, "intel: calling sentiment model");
    let prompt = build_scan_prompt(vix, spy_price);
    let search_result = ctx
        .ai
        .call_with_search(
            &prompt,
            &config.grok_model,
            SearchOptions {
                max_tokens: Some(1500),
                recency_days: Some(2),
            },
        )
        .await;

    let raw_text = match &search_result {
        Ok(r) => r.text.clone(),
        Err(e) => {
            warn!(error = %e, "intel: sentiment model call failed, recording degraded scan");
            String::new()
        }
    };

    let mut parsed = parse_scan(&raw_text);
    // Union trending from the model's own response with the provider's
    // trending/most-active feeds so Phase 2's candidate pool draws from
    // every available source, not just whichever returned first.
    for ticker in trending.iter().chain(most_active.iter()) {
        let upper = ticker.to_uppercase();
        if !parsed.trending_tickers.contains(&upper) {
            parsed.trending_tickers.push(upper);
        }
    }

    let today = ctx.clock.now().date_naive();
    let scan = NewMarketScan {
        scan_date: today,
        market_mood: parsed.market_mood,
        trending_tickers: parsed.trending_tickers.join(","),
        sector_momentum: serde_json::to_string(
            &parsed
                .sector_momentum
                .iter()
                .cloned()
                .collect::<std::collections::BTreeMap<_, _>>(),
        )
        .unwrap_or_else(|_| "{}".to_string()),
        caution_flags: parsed.caution_flags.join("\n"),
        raw_text,
        vix,
        spy_price,
        candidate_pool: None,
        selected_picks: None,
        sentiment_model: Some(config.grok_model.clone()),
        analysis_model: None,
    };

    if let Err(e) = ctx.store.upsert_market_scan(&scan).await {
        ctx.events
            .progress(1, ProgressStatus::Error, format!("intel: failed to persist scan: {e}"));
        return Ok(PhaseOutcome::Error);
    }

    ctx.events
        .progress(1, ProgressStatus::Complete, "intel: scan recorded");
    Ok(PhaseOutcome::Complete)
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
            clock: Arc::new(FixedClock::at("2026-03-05 06:00:00")),
            decisions: crate::decisions::DecisionLog::new(),
        }
    }

    #[tokio::test]
    async fn phase1_degrades_gracefully_without_network() {
        let ctx = sample_context().await;
        let outcome = run_phase1(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Complete);

        let scan = ctx
            .store
            .get_market_scan(chrono::NaiveDate::from_ymd_opt(2026, 3, 5).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scan.market_mood, "neutral");
    }

    #[tokio::test]
    async fn phase1_is_idempotent_per_day() {
        let ctx = sample_context().await;
        run_phase1(&ctx).await.unwrap();
        run_phase1(&ctx).await.unwrap();

        let today = chrono::NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let scan = ctx.store.get_market_scan(today).await.unwrap().unwrap();
        assert_eq!(scan.scan_date, today);
    }
}
