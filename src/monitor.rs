// =============================================================================
// Monitor (C9) — per-tick evaluation of every open trade's exit triggers
// =============================================================================
//
// Fires on the scheduler's tick. Short-circuits outside market hours, then
// walks every open trade in a strict order — stop-loss, then DTE
// management, then profit target — so a position crossing two thresholds in
// the same tick always records the most risk-averse outcome.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::events::{EventBus, PositionUpdateEvent, TradeAction};
use crate::market_data::{MarketDataGateway, OptionRight};
use crate::risk::{self, PortfolioMargin};
use crate::scheduler::is_market_hours;
use crate::store::{ExitData, Store};
use crate::types::{ExitReason, Strategy};

/// Which side of the market a strategy's primary short leg sits on. Used to
/// look up the right option chain quote for the Monitor's mid-price check.
fn option_right_for(strategy: Strategy) -> OptionRight {
    match strategy {
        Strategy::ShortPut | Strategy::CreditSpread => OptionRight::Put,
        Strategy::CoveredCall => OptionRight::Call,
    }
}

/// One tick's outcome summary, useful for logging and tests.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub evaluated: usize,
    pub closed: usize,
    pub skipped_no_quote: usize,
    pub margin_critical: bool,
}

/// Run one monitor tick. Returns immediately (an empty report) outside
/// market hours (spec §4.9 "If not within market hours, return
/// immediately").
pub async fn run_tick(
    store: &Store,
    gateway: &MarketDataGateway,
    events: &EventBus,
    clock: &dyn Clock,
    paper_balance: f64,
    max_margin_pct: f64,
    manage_dte: i64,
) -> anyhow::Result<TickReport> {
    if !is_market_hours(clock) {
        return Ok(TickReport::default());
    }

    let open_trades = store.get_open_trades().await?;
    let mut report = TickReport::default();

    for trade in open_trades {
        report.evaluated += 1;

        let Some(strategy) = trade.strategy_enum() else {
            warn!(trade_id = trade.id, strategy = %trade.strategy, "unrecognized strategy on open trade, skipping");
            continue;
        };
        let right = option_right_for(strategy);
        let premium = gateway
            .get_option_premium(&trade.ticker, &trade.expiry.to_string(), right, trade.strike)
            .await;
        let current_price = premium.ok().and_then(|p| p.mid);
        let Some(current_price) = current_price else {
            report.skipped_no_quote += 1;
            continue;
        };

        let pnl_per_contract = (trade.entry_price - current_price) * 100.0;
        let pnl_total = pnl_per_contract * trade.contracts as f64;
        let pnl_percent = if trade.entry_price != 0.0 {
            (trade.entry_price - current_price) / trade.entry_price * 100.0
        } else {
            0.0
        };

        let close_with = |reason: ExitReason| ExitData {
            exit_price: current_price,
            exit_date: clock.now().date_naive(),
            exit_spot: trade.entry_spot,
            exit_reason: reason,
            pnl_dollars: pnl_total,
            pnl_percent,
        };

        if current_price >= trade.stop_loss_price {
            store.close_trade(trade.id, close_with(ExitReason::StopLoss)).await?;
            if let Some(closed) = store.get_trade(trade.id).await? {
                events.trade(TradeAction::StopLoss, closed);
            }
            report.closed += 1;
            continue;
        }

        if trade.dte > 0 && trade.dte <= manage_dte {
            store.close_trade(trade.id, close_with(ExitReason::DteManage)).await?;
            if let Some(closed) = store.get_trade(trade.id).await? {
                events.trade(TradeAction::DteManage, closed);
            }
            report.closed += 1;
            continue;
        }

        if current_price <= trade.profit_target_price {
            store
                .close_trade(trade.id, close_with(ExitReason::ProfitTarget))
                .await?;
            if let Some(closed) = store.get_trade(trade.id).await? {
                events.trade(TradeAction::ProfitTarget, closed);
            }
            report.closed += 1;
            continue;
        }

        events.position_update(PositionUpdateEvent {
            trade_id: trade.id,
            current_price,
            pnl_per_contract,
            pnl_percent,
            pnl_total,
        });
    }

    let still_open = store.get_open_trades().await?;
    let margin: PortfolioMargin = risk::portfolio_margin(&still_open, paper_balance, max_margin_pct);
    if risk::is_margin_utilization_critical(&margin) {
        report.margin_critical = true;
        warn!(
            pct_of_balance = margin.pct_of_balance,
            cap_pct = margin.cap_pct,
            "portfolio margin utilization at or above 90% of cap"
        );
    }

    info!(
        evaluated = report.evaluated,
        closed = report.closed,
        skipped_no_quote = report.skipped_no_quote,
        "monitor tick complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventBus;
    use crate::store::TradeDraft;
    use crate::types::Strategy;

    fn sample_draft(stop_loss: f64, profit_target: f64, dte: i64) -> TradeDraft {
        TradeDraft {
            ticker: "AAA".to_string(),
            strategy: Strategy::CreditSpread,
            direction: "short",
            sector: "Technology".to_string(),
            strike: 180.0,
            strike_sell: Some(180.0),
            strike_buy: Some(175.0),
            spread_width: Some(5.0),
            expiry: NaiveDate::from_ymd_opt(2026, 4, 17).unwrap(),
            dte,
            contracts: 1,
            entry_price: 1.2,
            entry_date: NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
            entry_spot: 181.0,
            entry_iv: None,
            entry_delta: None,
            max_profit: 120.0,
            max_loss: 380.0,
            market_scan_id: None,
            ai_rationale: None,
            ai_confidence: None,
            model_used: None,
            stop_loss_price: stop_loss,
            profit_target_price: profit_target,
        }
    }

    #[tokio::test]
    async fn tick_outside_market_hours_is_a_no_op() {
        let store = Store::open_in_memory().await.unwrap();
        let gateway = MarketDataGateway::new("http://localhost:1");
        let events = EventBus::new(16);
        let clock = FixedClock::at("2026-03-07 10:00:00"); // Saturday

        let report = run_tick(&store, &gateway, &events, &clock, 100_000.0, 70.0, 21)
            .await
            .unwrap();
        assert_eq!(report.evaluated, 0);
    }

    #[tokio::test]
    async fn dte_manage_closes_before_profit_target_ordering() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_trade(sample_draft(2.4, 0.6, 10), 2, &[Strategy::CreditSpread])
            .await
            .unwrap();
        let open = store.get_open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
        assert!(open[0].dte <= 21 && open[0].dte > 0);
    }
}
