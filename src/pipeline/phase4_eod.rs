// =============================================================================
// Phase 4 — End-of-day review
// =============================================================================
//
// Safety net after the Monitor's market-hours ticks: any trade that reached
// expiration or fell into the manage-DTE window but was never caught by a
// tick gets closed here. Then the day's DailySummary is upserted (spec §4.7
// "Phase 4 — End-of-day review").
// =============================================================================

use chrono::NaiveDate;
use tracing::warn;

use crate::config::ConfigSnapshot;
use crate::events::{ProgressStatus, TradeAction};
use crate::market_data::OptionRight;
use crate::risk;
use crate::store::{DailySummary, ExitData, Trade};
use crate::types::{ExitReason, PhaseOutcome, Strategy};

use super::PipelineContext;

fn option_right_for(strategy: Strategy) -> OptionRight {
    match strategy {
        Strategy::ShortPut | Strategy::CreditSpread => OptionRight::Put,
        Strategy::CoveredCall => OptionRight::Call,
    }
}

pub async fn run_phase4(ctx: &PipelineContext) -> anyhow::Result<PhaseOutcome> {
    ctx.events.progress(4, ProgressStatus::Starting, "eod: starting review");

    let config = ConfigSnapshot::load(&ctx.store).await?;
    let today = ctx.clock.now().date_naive();
    let open_trades = ctx.store.get_open_trades().await?;

    let mut expired = 0;
    let mut dte_managed = 0;

    for trade in open_trades {
        if trade.dte <= 0 {
            close_expired(ctx, &trade, today).await?;
            expired += 1;
            continue;
        }

        if trade.dte <= config.manage_dte {
            if close_dte_managed(ctx, &trade, today).await? {
                dte_managed += 1;
            }
            // No mid available — leave open for the next market-hours tick
            // (spec §9 Open Question).
        }
    }

    write_daily_summary(ctx, &config, today).await?;

    ctx.events.progress(
        4,
        ProgressStatus::Complete,
        format!("eod: {expired} expired, {dte_managed} dte-managed"),
    );
    Ok(PhaseOutcome::Complete)
}

/// Expiration reached: the position is worthless, the full credit is kept
/// (spec §4.7 "exit_price = 0 ... pnl_dollars = entry_price * 100 * contracts").
async fn close_expired(ctx: &PipelineContext, trade: &Trade, today: NaiveDate) -> anyhow::Result<()> {
    let exit_spot = fetch_spot(ctx, &trade.ticker).await.unwrap_or(trade.entry_spot);
    let exit = ExitData {
        exit_price: 0.0,
        exit_date: today,
        exit_spot,
        exit_reason: ExitReason::Expiry,
        pnl_dollars: trade.entry_price * 100.0 * trade.contracts as f64,
        pnl_percent: 100.0,
    };
    ctx.store.close_trade(trade.id, exit).await?;
    if let Some(closed) = ctx.store.get_trade(trade.id).await? {
        ctx.events.trade(TradeAction::Closed, closed);
    }
    Ok(())
}

/// Auto-close at the manage-DTE threshold if the current mid is available;
/// otherwise leave it open for the Monitor's next tick (spec §4.7 "if
/// available, close ... else leave the position open").
async fn close_dte_managed(ctx: &PipelineContext, trade: &Trade, today: NaiveDate) -> anyhow::Result<bool> {
    let Some(strategy) = trade.strategy_enum() else {
        warn!(trade_id = trade.id, strategy = %trade.strategy, "eod: unrecognized strategy, skipping");
        return Ok(false);
    };
    let right = option_right_for(strategy);
    let premium = ctx
        .market_data
        .get_option_premium(&trade.ticker, &trade.expiry.to_string(), right, trade.strike)
        .await
        .ok();
    let Some(current_price) = premium.and_then(|p| p.mid) else {
        return Ok(false);
    };
    let exit_spot = fetch_spot(ctx, &trade.ticker).await.unwrap_or(trade.entry_spot);

    let pnl_dollars = (trade.entry_price - current_price) * 100.0 * trade.contracts as f64;
    let pnl_percent = if trade.entry_price != 0.0 {
        (trade.entry_price - current_price) / trade.entry_price * 100.0
    } else {
        0.0
    };

    let exit = ExitData {
        exit_price: current_price,
        exit_date: today,
        exit_spot,
        exit_reason: ExitReason::DteManage,
        pnl_dollars,
        pnl_percent,
    };
    ctx.store.close_trade(trade.id, exit).await?;
    if let Some(closed) = ctx.store.get_trade(trade.id).await? {
        ctx.events.trade(TradeAction::DteManage, closed);
    }
    Ok(true)
}

async fn fetch_spot(ctx: &PipelineContext, ticker: &str) -> Option<f64> {
    ctx.market_data.get_quote(ticker).await.ok().map(|q| q.last)
}

async fn write_daily_summary(
    ctx: &PipelineContext,
    config: &ConfigSnapshot,
    today: NaiveDate,
) -> anyhow::Result<()> {
    let opens_today = ctx.store.get_trades_opened_on(today).await?;
    let closes_today = ctx.store.get_trades_closed_on(today).await?;

    let wins = closes_today.iter().filter(|t| t.pnl_dollars.unwrap_or(0.0) >= 0.0).count() as i64;
    let losses = closes_today.len() as i64 - wins;
    let total_pnl: f64 = closes_today.iter().filter_map(|t| t.pnl_dollars).sum();

    let still_open = ctx.store.get_open_trades().await?;
    let margin = risk::portfolio_margin(&still_open, config.paper_balance, config.max_margin_pct);
    let equity = ctx.store.get_equity_curve().await?;

    ctx.store
        .upsert_daily_summary(&DailySummary {
            summary_date: today,
            opens: opens_today.len() as i64,
            closes: closes_today.len() as i64,
            wins,
            losses,
            total_pnl,
            account_value: equity.current_value,
            capital_at_risk: margin.total,
            reflection: None,
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::ai_gateway::AiGateway;
    use crate::clock::FixedClock;
    use crate::events::EventBus;
    use crate::market_data::MarketDataGateway;
    use crate::store::{Store, TradeDraft};

    async fn sample_context(now: &str) -> PipelineContext {
        PipelineContext {
            store: Store::open_in_memory().await.unwrap(),
            market_data: MarketDataGateway::new("http://localhost:1"),
            ai: AiGateway::new("http://localhost:1", std::time::Duration::from_millis(50)),
            events: EventBus::new(16),
            clock: Arc::new(FixedClock::at(now)),
            decisions: crate::decisions::DecisionLog::new(),
        }
    }

    fn sample_draft(dte: i64, entry_price: f64) -> TradeDraft {
        TradeDraft {
            ticker: "AAA".to_string(),
            strategy: Strategy::ShortPut,
            direction: "short",
            sector: "Technology".to_string(),
            strike: 100.0,
            strike_sell: None,
            strike_buy: None,
            spread_width: None,
            expiry: NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
            dte,
            contracts: 2,
            entry_price,
            entry_date: NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
            entry_spot: 101.0,
            entry_iv: None,
            entry_delta: None,
            max_profit: entry_price * 200.0,
            max_loss: (100.0 - entry_price) * 200.0,
            market_scan_id: None,
            ai_rationale: None,
            ai_confidence: None,
            model_used: None,
            stop_loss_price: entry_price * 3.0,
            profit_target_price: entry_price * 0.5,
        }
    }

    #[tokio::test]
    async fn expired_trade_closes_with_full_credit_kept() {
        let ctx = sample_context("2026-03-20 16:01:00").await;
        ctx.store
            .insert_trade(sample_draft(0, 1.5), 2, &[Strategy::ShortPut])
            .await
            .unwrap();

        run_phase4(&ctx).await.unwrap();

        let open = ctx.store.get_open_trades().await.unwrap();
        assert!(open.is_empty());
        let trades = ctx.store.get_all_trades(10).await.unwrap();
        let trade = &trades[0];
        assert_eq!(trade.exit_reason.as_deref(), Some("expiry"));
        assert_eq!(trade.exit_price, Some(0.0));
        assert_eq!(trade.pnl_dollars, Some(1.5 * 100.0 * 2.0));
    }

    #[tokio::test]
    async fn manage_dte_without_a_quote_leaves_position_open() {
        let ctx = sample_context("2026-03-05 16:01:00").await;
        ctx.store
            .insert_trade(sample_draft(10, 1.5), 2, &[Strategy::ShortPut])
            .await
            .unwrap();

        run_phase4(&ctx).await.unwrap();

        let open = ctx.store.get_open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn daily_summary_is_upserted_even_with_no_trades() {
        let ctx = sample_context("2026-03-05 16:01:00").await;
        run_phase4(&ctx).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let summaries = ctx.store.get_daily_summaries(5).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].summary_date, today);
    }
}
