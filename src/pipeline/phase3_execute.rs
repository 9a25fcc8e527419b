// =============================================================================
// Phase 3 — Execute
// =============================================================================
//
// Walks the current picks list against every guardrail in order and opens
// trades one at a time, updating live-tracked `open_tickers`/`sector_counts`
// sets as it goes so later picks in the same run see earlier ones (spec
// §4.7 "Phase 3 — Execute", §5 "per-ticker decisions are sequential").
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::info;

use crate::config::ConfigSnapshot;
use crate::events::{ProgressStatus, TradeAction};
use crate::market_data::OptionRight;
use crate::parsers::ParsedPick;
use crate::risk;
use crate::store::TradeDraft;
use crate::types::{PhaseOutcome, Strategy};

use super::{run_phase2, PipelineContext};

fn option_right_for(strategy: Strategy) -> OptionRight {
    match strategy {
        Strategy::ShortPut | Strategy::CreditSpread => OptionRight::Put,
        Strategy::CoveredCall => OptionRight::Call,
    }
}

pub async fn run_phase3(ctx: &PipelineContext) -> anyhow::Result<PhaseOutcome> {
    ctx.events.progress(3, ProgressStatus::Starting, "execute: starting");

    let today = ctx.clock.now().date_naive();
    if ctx.store.get_market_scan(today).await?.is_none() {
        ctx.events
            .progress(3, ProgressStatus::Error, "execute: no scan exists for today");
        return Ok(PhaseOutcome::Error);
    }

    let phase2 = run_phase2(ctx).await?;
    if phase2.picks.is_empty() {
        ctx.events
            .progress(3, ProgressStatus::Skipped, "execute: no picks available");
        return Ok(PhaseOutcome::Skipped);
    }

    let config = ConfigSnapshot::load(&ctx.store).await?;
    let mut open_trades = ctx.store.get_open_trades().await?;

    let slots_available = config.max_positions - open_trades.len() as i64;
    if slots_available <= 0 {
        ctx.events
            .progress(3, ProgressStatus::Skipped, "execute: no open slots available");
        return Ok(PhaseOutcome::Skipped);
    }

    let daily_risk_budget = config.daily_risk_budget();
    let margin = risk::portfolio_margin(&open_trades, config.paper_balance, config.max_margin_pct);
    if margin.pct_of_balance >= config.max_margin_pct {
        ctx.events
            .progress(3, ProgressStatus::Skipped, "execute: margin cap already reached");
        return Ok(PhaseOutcome::Skipped);
    }

    let mut open_tickers: HashSet<String> = open_trades.iter().map(|t| t.ticker.clone()).collect();
    let mut sector_counts: HashMap<String, i64> = HashMap::new();
    for trade in &open_trades {
        *sector_counts.entry(trade.sector.clone()).or_insert(0) += 1;
    }

    let mut capital_used = 0.0;
    let mut portfolio_total = margin.total;
    let mut opened = 0;

    for pick in phase2.picks.into_iter().take(slots_available as usize) {
        if let Some(outcome) = try_open_pick(
            ctx,
            &pick,
            &config,
            today,
            &mut open_tickers,
            &mut sector_counts,
            &mut capital_used,
            &mut portfolio_total,
            daily_risk_budget,
            margin.max_allowed,
        )
        .await?
        {
            if outcome {
                opened += 1;
                open_trades = ctx.store.get_open_trades().await?;
            }
        }
    }

    info!(opened, "execute: phase complete");
    ctx.events.progress(
        3,
        ProgressStatus::Complete,
        format!("execute: opened {opened} trade(s)"),
    );
    Ok(PhaseOutcome::Complete)
}

#[allow(clippy::too_many_arguments)]
async fn try_open_pick(
    ctx: &PipelineContext,
    pick: &ParsedPick,
    config: &ConfigSnapshot,
    today: NaiveDate,
    open_tickers: &mut HashSet<String>,
    sector_counts: &mut HashMap<String, i64>,
    capital_used: &mut f64,
    portfolio_total: &mut f64,
    daily_risk_budget: f64,
    max_allowed_margin: f64,
) -> anyhow::Result<Option<bool>> {
    if open_tickers.contains(&pick.ticker) {
        let reason = "duplicate open ticker";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    }

    let sector = risk::sector_for(&pick.ticker);
    if *sector_counts.get(&sector).unwrap_or(&0) >= config.max_per_sector {
        let reason = format!("sector {sector} at cap");
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    }

    let quote = match ctx.market_data.get_quote(&pick.ticker).await {
        Ok(q) => q,
        Err(_) => {
            let reason = "no quote available";
            ctx.events
                .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
            ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
            return Ok(Some(false));
        }
    };

    if !config.allowed_strategies.contains(&pick.strategy) {
        let reason = "strategy not in allowed list";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    }
    let Some(dte) = pick.dte else {
        let reason = "validation failed — no DTE";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    };
    if dte < config.min_dte || dte > config.max_dte {
        let reason = format!("DTE {dte} outside allowed range");
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    }
    if pick.strategy == Strategy::CreditSpread {
        let width = pick.spread_width.unwrap_or(0.0);
        if width < config.min_spread_width {
            let reason = "spread width below minimum";
            ctx.events
                .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
            ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
            return Ok(Some(false));
        }
    }
    let Some(strike) = pick.strike else {
        let reason = "validation failed — no strike";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    };
    let Some(expiry_str) = &pick.expiry else {
        let reason = "validation failed — no expiry";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    };
    let Ok(expiry) = NaiveDate::parse_from_str(expiry_str, "%Y-%m-%d") else {
        let reason = "validation failed — unparseable expiry";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    };

    let right = option_right_for(pick.strategy);
    let premium = ctx
        .market_data
        .get_option_premium(&pick.ticker, expiry_str, right, strike)
        .await
        .ok();
    let entry_price = premium
        .as_ref()
        .and_then(|p| p.mid.or(p.ask))
        .or(pick.estimated_premium);
    let entry_iv = premium.as_ref().and_then(|p| p.iv);
    let entry_delta = premium.as_ref().and_then(|p| p.delta);
    let Some(entry_price) = entry_price else {
        let reason = "no premium available";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    };
    if entry_price <= 0.05 {
        let reason = "premium too low";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    }

    let contracts = pick.contracts.unwrap_or(1).max(1);
    let trade_risk = risk::per_trade_risk(pick.strategy, strike, entry_price, pick.spread_width, contracts);
    if *capital_used + trade_risk > daily_risk_budget {
        let reason = "daily risk budget exhausted";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    }
    if *portfolio_total + trade_risk > max_allowed_margin {
        let reason = "would exceed margin cap";
        ctx.events
            .log(format!("execute: skipping {} — {reason}", pick.ticker), ctx.clock.now());
        ctx.decisions.record(&pick.ticker, false, reason, ctx.clock.now());
        return Ok(Some(false));
    }

    let stop_loss_price = entry_price * (1.0 + config.stop_loss_multiplier);
    let profit_target_price = entry_price * (1.0 - config.profit_target_pct / 100.0);
    let envelope = risk::profit_loss_envelope(
        pick.strategy,
        strike,
        entry_price,
        pick.spread_width,
        quote.last,
        contracts,
    );

    let draft = TradeDraft {
        ticker: pick.ticker.clone(),
        strategy: pick.strategy,
        direction: "short",
        sector: sector.clone(),
        strike,
        strike_sell: pick.strike_sell,
        strike_buy: pick.strike_buy,
        spread_width: pick.spread_width,
        expiry,
        dte,
        contracts,
        entry_price,
        entry_date: today,
        entry_spot: quote.last,
        entry_iv,
        entry_delta,
        max_profit: envelope.max_profit,
        max_loss: envelope.max_loss,
        market_scan_id: None,
        ai_rationale: pick.rationale.clone(),
        ai_confidence: pick.confidence,
        model_used: Some(config.deepseek_model.clone()),
        stop_loss_price,
        profit_target_price,
    };

    let id = ctx
        .store
        .insert_trade(draft, config.max_per_sector, &config.allowed_strategies)
        .await?;

    open_tickers.insert(pick.ticker.clone());
    *sector_counts.entry(sector).or_insert(0) += 1;
    *capital_used += trade_risk;
    *portfolio_total += trade_risk;

    if let Some(trade) = ctx.store.get_trade(id).await? {
        ctx.events.trade(TradeAction::Opened, trade);
    }
    ctx.decisions.record(&pick.ticker, true, "opened", ctx.clock.now());

    Ok(Some(true))
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
            clock: Arc::new(FixedClock::at("2026-03-05 09:31:00")),
            decisions: crate::decisions::DecisionLog::new(),
        }
    }

    #[tokio::test]
    async fn phase3_aborts_without_a_scan() {
        let ctx = sample_context().await;
        let outcome = run_phase3(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Error);
    }

    #[tokio::test]
    async fn phase3_skips_when_no_network_yields_no_picks() {
        let ctx = sample_context().await;
        ctx.store
            .set_config("enabled", "true")
            .await
            .unwrap();
        super::run_phase2(&ctx).await.unwrap();
        let outcome = run_phase3(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Skipped);
    }

    #[tokio::test]
    async fn phase3_skips_when_no_slots_available() {
        let ctx = sample_context().await;
        ctx.store.set_config("max_positions", "0").await.unwrap();
        super::run_phase2(&ctx).await.unwrap();
        let outcome = run_phase3(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Skipped);
    }

    #[tokio::test]
    async fn try_open_pick_records_a_skip_decision_for_a_duplicate_ticker() {
        let ctx = sample_context().await;
        let config = ConfigSnapshot::load(&ctx.store).await.unwrap();
        let pick = ParsedPick {
            ticker: "AAPL".to_string(),
            strategy: Strategy::ShortPut,
            strike: Some(100.0),
            strike_sell: None,
            strike_buy: None,
            spread_width: None,
            expiry: Some("2026-04-17".to_string()),
            dte: Some(30),
            contracts: Some(1),
            estimated_premium: Some(2.0),
            confidence: None,
            sector: None,
            rationale: None,
        };
        let mut open_tickers: HashSet<String> = ["AAPL".to_string()].into_iter().collect();
        let mut sector_counts = HashMap::new();
        let mut capital_used = 0.0;
        let mut portfolio_total = 0.0;

        let outcome = try_open_pick(
            &ctx,
            &pick,
            &config,
            NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
            &mut open_tickers,
            &mut sector_counts,
            &mut capital_used,
            &mut portfolio_total,
            1_000_000.0,
            1_000_000.0,
        )
        .await
        .unwrap();

        assert_eq!(outcome, Some(false));
        let recent = ctx.decisions.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].ticker, "AAPL");
        assert!(!recent[0].opened);
        assert_eq!(recent[0].reason, "duplicate open ticker");
    }
}
