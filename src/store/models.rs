// =============================================================================
// Store data model — Trade, MarketScan, TradeReview, DailySummary, LearnedRule
// =============================================================================
//
// These mirror spec §3 exactly. Rows are read back via `sqlx::FromRow`; the
// `Draft`/`ExitData` types are the caller-supplied halves of a mutation, kept
// separate from the full record the same way a trade "proposal" is kept
// separate from the `Trade` it becomes once opened.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{ExitReason, Strategy, TradeStatus};

/// A single options position opened by the engine (spec §3 "Trade").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trade {
    pub id: i64,
    pub ticker: String,
    pub strategy: String,
    pub direction: String,
    pub sector: String,

    pub strike: f64,
    pub strike_sell: Option<f64>,
    pub strike_buy: Option<f64>,
    pub spread_width: Option<f64>,
    pub expiry: NaiveDate,
    pub dte: i64,
    pub contracts: i64,

    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub entry_spot: f64,
    pub entry_iv: Option<f64>,
    pub entry_delta: Option<f64>,

    pub exit_price: Option<f64>,
    pub exit_date: Option<NaiveDate>,
    pub exit_spot: Option<f64>,
    pub exit_reason: Option<String>,

    pub pnl_dollars: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub max_profit: f64,
    pub max_loss: f64,

    pub market_scan_id: Option<i64>,
    pub ai_rationale: Option<String>,
    pub ai_confidence: Option<f64>,
    pub model_used: Option<String>,

    pub stop_loss_price: f64,
    pub profit_target_price: f64,

    pub status: String,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open.as_str()
    }

    pub fn strategy_enum(&self) -> Option<Strategy> {
        Strategy::parse(&self.strategy)
    }
}

/// Caller-supplied fields to insert a new trade (spec §4.1 `insertTrade`).
#[derive(Debug, Clone)]
pub struct TradeDraft {
    pub ticker: String,
    pub strategy: Strategy,
    pub direction: &'static str,
    pub sector: String,

    pub strike: f64,
    pub strike_sell: Option<f64>,
    pub strike_buy: Option<f64>,
    pub spread_width: Option<f64>,
    pub expiry: NaiveDate,
    pub dte: i64,
    pub contracts: i64,

    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub entry_spot: f64,
    pub entry_iv: Option<f64>,
    pub entry_delta: Option<f64>,

    pub max_profit: f64,
    pub max_loss: f64,

    pub market_scan_id: Option<i64>,
    pub ai_rationale: Option<String>,
    pub ai_confidence: Option<f64>,
    pub model_used: Option<String>,

    pub stop_loss_price: f64,
    pub profit_target_price: f64,
}

/// Caller-supplied fields to close a trade (spec §4.1 `closeTrade`).
#[derive(Debug, Clone)]
pub struct ExitData {
    pub exit_price: f64,
    pub exit_date: NaiveDate,
    pub exit_spot: f64,
    pub exit_reason: ExitReason,
    pub pnl_dollars: f64,
    pub pnl_percent: f64,
}

/// One record per trading date (spec §3 "MarketScan").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketScan {
    pub id: i64,
    pub scan_date: NaiveDate,
    pub market_mood: String,
    /// Comma-joined ordered ticker list.
    pub trending_tickers: String,
    /// JSON object mapping sector -> direction string.
    pub sector_momentum: String,
    /// Newline-joined ordered caution strings.
    pub caution_flags: String,
    pub raw_text: String,
    pub vix: Option<f64>,
    pub spy_price: Option<f64>,
    /// JSON array of candidate tickers considered in Phase 2.
    pub candidate_pool: Option<String>,
    /// JSON array of the picks produced by Phase 2.
    pub selected_picks: Option<String>,
    pub sentiment_model: Option<String>,
    pub analysis_model: Option<String>,
}

impl MarketScan {
    pub fn trending_list(&self) -> Vec<String> {
        self.trending_tickers
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn caution_list(&self) -> Vec<String> {
        self.caution_flags
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Append-only analysis written after a trade closes (spec §3 "TradeReview").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeReview {
    pub id: i64,
    pub trade_id: i64,
    pub raw_text: String,
    pub lesson: Option<String>,
    pub what_worked: Option<String>,
    pub what_failed: Option<String>,
    pub should_repeat: Option<bool>,
    pub model_used: Option<String>,
}

/// Upserted once per trading day (spec §3 "DailySummary").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailySummary {
    pub summary_date: NaiveDate,
    pub opens: i64,
    pub closes: i64,
    pub wins: i64,
    pub losses: i64,
    pub total_pnl: f64,
    pub account_value: f64,
    pub capital_at_risk: f64,
    pub reflection: Option<String>,
}

/// A rule derived from reviews that feeds future prompt context (spec §3
/// "LearnedRule").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LearnedRule {
    pub id: i64,
    pub rule_text: String,
    pub category: String,
    /// Comma-joined source trade ids.
    pub source_trade_ids: String,
    pub confidence: f64,
    pub times_applied: i64,
    pub times_helpful: i64,
    pub active: bool,
}

/// Aggregate reporting payload (spec §4.1 `getPerformanceMetrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: i64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub by_strategy: Vec<StrategyBreakdown>,
    pub by_ticker: Vec<TickerBreakdown>,
    pub best_trade: Option<Trade>,
    pub worst_trade: Option<Trade>,
    pub pnl_by_exit_date: Vec<(NaiveDate, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyBreakdown {
    pub strategy: String,
    pub trades: i64,
    pub win_rate: f64,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerBreakdown {
    pub ticker: String,
    pub trades: i64,
    pub win_rate: f64,
    pub total_pnl: f64,
}

/// Derived equity curve view (spec §3 "EquityCurve").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityCurve {
    pub starting_balance: f64,
    pub current_value: f64,
    pub points: Vec<(NaiveDate, f64)>,
}
