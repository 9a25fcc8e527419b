// =============================================================================
// Risk Engine (C8) — pure functions over a trade draft and current config
// =============================================================================
//
// Not a stateful circuit-breaker tracking daily-loss / consecutive-loss /
// drawdown counters across calls — a set of pure functions instead: every
// call takes exactly the inputs it needs and returns a value, nothing is
// remembered between calls. Whatever statefulness a risk engine needs lives
// one layer up, in the Store (config, open trades) and the pipeline that
// calls these functions.
// =============================================================================

use chrono::NaiveDate;

use crate::clock::Clock;
use crate::sector_map;
use crate::store::Trade;
use crate::types::Strategy;

/// Portfolio-wide margin snapshot (spec §4.8 "Portfolio margin").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioMargin {
    pub total: f64,
    pub pct_of_balance: f64,
    pub max_allowed: f64,
    pub available: f64,
    pub cap_pct: f64,
    pub open_count: usize,
}

/// Max profit and max loss for a strategy at given terms (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitLossEnvelope {
    pub max_profit: f64,
    pub max_loss: f64,
}

/// Approximate capital consumption of a single trade, per strategy (spec
/// §4.8 "Per-trade risk"). `entry_price` is the per-share premium quoted by
/// the Market Data Gateway; `spread_width` only applies to `credit_spread`.
pub fn per_trade_risk(
    strategy: Strategy,
    strike: f64,
    entry_price: f64,
    spread_width: Option<f64>,
    contracts: i64,
) -> f64 {
    let contracts = contracts as f64;
    match strategy {
        Strategy::ShortPut => strike * 0.20 * 100.0 * contracts,
        Strategy::CreditSpread => match spread_width {
            Some(width) => (width - entry_price) * 100.0 * contracts,
            None => 5_000.0,
        },
        Strategy::CoveredCall => strike * 100.0 * contracts,
    }
}

/// Max profit / max loss envelope for a strategy at given terms (spec §4.8
/// "Max profit / max loss per strategy"). `spot` is only used by
/// `covered_call`'s max-loss formula (the notional share position).
pub fn profit_loss_envelope(
    strategy: Strategy,
    strike: f64,
    entry_price: f64,
    spread_width: Option<f64>,
    spot: f64,
    contracts: i64,
) -> ProfitLossEnvelope {
    let contracts = contracts as f64;
    match strategy {
        Strategy::ShortPut => ProfitLossEnvelope {
            max_profit: entry_price * 100.0 * contracts,
            max_loss: (strike - entry_price) * 100.0 * contracts,
        },
        Strategy::CreditSpread => {
            let width = spread_width.unwrap_or(0.0);
            ProfitLossEnvelope {
                max_profit: entry_price * 100.0 * contracts,
                max_loss: (width - entry_price) * 100.0 * contracts,
            }
        }
        Strategy::CoveredCall => ProfitLossEnvelope {
            max_profit: entry_price * 100.0 * contracts,
            max_loss: spot * 100.0 * contracts,
        },
    }
}

/// Sum per-trade risk across all currently open trades and compare against
/// the configured cap (spec §4.8 "Portfolio margin").
pub fn portfolio_margin(open_trades: &[Trade], paper_balance: f64, max_margin_pct: f64) -> PortfolioMargin {
    let total: f64 = open_trades
        .iter()
        .filter_map(|t| {
            let strategy = t.strategy_enum()?;
            Some(per_trade_risk(
                strategy,
                t.strike,
                t.entry_price,
                t.spread_width,
                t.contracts,
            ))
        })
        .sum();

    let max_allowed = paper_balance * max_margin_pct / 100.0;
    let pct_of_balance = if paper_balance > 0.0 {
        total / paper_balance * 100.0
    } else {
        0.0
    };

    PortfolioMargin {
        total,
        pct_of_balance,
        max_allowed,
        available: (max_allowed - total).max(0.0),
        cap_pct: max_margin_pct,
        open_count: open_trades.len(),
    }
}

/// Integer days from now (local market close) to `expiry`, clipped at 0
/// (spec §4.8 "DTE").
pub fn days_to_expiry(clock: &dyn Clock, expiry: NaiveDate) -> i64 {
    let today = clock.now().date_naive();
    (expiry - today).num_days().max(0)
}

/// Curated ticker -> sector lookup, falling back to "Unknown" (spec §4.8
/// "Sector lookup").
pub fn sector_for(ticker: &str) -> String {
    sector_map::sector_for(ticker)
}

/// Whether portfolio margin utilization has crossed the monitor's soft
/// health-check threshold (spec §4.9 "soft health check").
pub fn is_margin_utilization_critical(margin: &PortfolioMargin) -> bool {
    margin.max_allowed > 0.0 && margin.total / margin.max_allowed >= 0.90
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::{ExitData, Store, TradeDraft};
    use crate::types::ExitReason;

    #[test]
    fn short_put_risk_uses_twenty_percent_of_strike() {
        let risk = per_trade_risk(Strategy::ShortPut, 100.0, 1.5, None, 2);
        assert_eq!(risk, 100.0 * 0.20 * 100.0 * 2.0);
    }

    #[test]
    fn credit_spread_risk_uses_net_max_loss() {
        let risk = per_trade_risk(Strategy::CreditSpread, 0.0, 1.2, Some(5.0), 1);
        assert_eq!(risk, (5.0 - 1.2) * 100.0);
    }

    #[test]
    fn credit_spread_risk_falls_back_without_width() {
        let risk = per_trade_risk(Strategy::CreditSpread, 0.0, 1.2, None, 1);
        assert_eq!(risk, 5_000.0);
    }

    #[test]
    fn covered_call_risk_is_notional() {
        let risk = per_trade_risk(Strategy::CoveredCall, 200.0, 3.0, None, 1);
        assert_eq!(risk, 200.0 * 100.0);
    }

    #[test]
    fn short_put_envelope() {
        let env = profit_loss_envelope(Strategy::ShortPut, 100.0, 1.5, None, 101.0, 1);
        assert_eq!(env.max_profit, 150.0);
        assert_eq!(env.max_loss, (100.0 - 1.5) * 100.0);
    }

    #[test]
    fn covered_call_envelope_uses_spot_for_max_loss() {
        let env = profit_loss_envelope(Strategy::CoveredCall, 200.0, 3.0, None, 195.0, 1);
        assert_eq!(env.max_profit, 300.0);
        assert_eq!(env.max_loss, 195.0 * 100.0);
    }

    #[test]
    fn days_to_expiry_clips_at_zero_when_past() {
        let clock = FixedClock::at("2026-04-20 09:31:00");
        let expiry = NaiveDate::from_ymd_opt(2026, 4, 10).unwrap();
        assert_eq!(days_to_expiry(&clock, expiry), 0);
    }

    #[test]
    fn days_to_expiry_counts_forward() {
        let clock = FixedClock::at("2026-04-01 09:31:00");
        let expiry = NaiveDate::from_ymd_opt(2026, 4, 11).unwrap();
        assert_eq!(days_to_expiry(&clock, expiry), 10);
    }

    #[tokio::test]
    async fn portfolio_margin_sums_open_trades_and_respects_cap() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_trade(
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
                    dte: 35,
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
                    stop_loss_price: 2.4,
                    profit_target_price: 0.6,
                },
                2,
                &[Strategy::CreditSpread],
            )
            .await
            .unwrap();

        let open = store.get_open_trades().await.unwrap();
        let margin = portfolio_margin(&open, 100_000.0, 70.0);
        assert_eq!(margin.total, (5.0 - 1.2) * 100.0);
        assert_eq!(margin.open_count, 1);
        assert!(!is_margin_utilization_critical(&margin));
    }

    #[tokio::test]
    async fn closed_trades_do_not_count_against_margin() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .insert_trade(
                TradeDraft {
                    ticker: "AAA".to_string(),
                    strategy: Strategy::ShortPut,
                    direction: "short",
                    sector: "Technology".to_string(),
                    strike: 180.0,
                    strike_sell: None,
                    strike_buy: None,
                    spread_width: None,
                    expiry: NaiveDate::from_ymd_opt(2026, 4, 17).unwrap(),
                    dte: 35,
                    contracts: 1,
                    entry_price: 1.2,
                    entry_date: NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
                    entry_spot: 181.0,
                    entry_iv: None,
                    entry_delta: None,
                    max_profit: 120.0,
                    max_loss: 17_880.0,
                    market_scan_id: None,
                    ai_rationale: None,
                    ai_confidence: None,
                    model_used: None,
                    stop_loss_price: 2.4,
                    profit_target_price: 0.6,
                },
                2,
                &[Strategy::ShortPut],
            )
            .await
            .unwrap();
        store
            .close_trade(
                id,
                ExitData {
                    exit_price: 0.5,
                    exit_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
                    exit_spot: 185.0,
                    exit_reason: ExitReason::ProfitTarget,
                    pnl_dollars: 70.0,
                    pnl_percent: 58.0,
                },
            )
            .await
            .unwrap();

        let open = store.get_open_trades().await.unwrap();
        let margin = portfolio_margin(&open, 100_000.0, 70.0);
        assert_eq!(margin.total, 0.0);
        assert_eq!(margin.open_count, 0);
    }
}
