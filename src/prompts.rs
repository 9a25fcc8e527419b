// =============================================================================
// Prompts (C5) — pure functions that build the text sent to the AI Gateway
// =============================================================================
//
// Every function here is deterministic given its inputs: no I/O, no clock
// reads. The delimited-block grammar matches spec §6.3 exactly — the
// Parsers module depends on these exact markers, so if this text changes the
// parser must change with it.
// =============================================================================

use crate::store::PerformanceMetrics;
use crate::types::Strategy;

/// Build the morning sentiment-scan prompt (spec §4.7 Phase 1, §6.3 "Scan
/// response").
pub fn build_scan_prompt(vix: Option<f64>, spy_price: Option<f64>) -> String {
    let mut p = String::new();
    p.push_str(
        "You are a markets analyst producing a concise daily sentiment scan for US equities and broad-market ETFs.\n\n",
    );
    if let Some(vix) = vix {
        p.push_str(&format!("Current VIX: {vix:.2}\n"));
    }
    if let Some(spy) = spy_price {
        p.push_str(&format!("Current SPY price: {spy:.2}\n"));
    }
    p.push_str(
        "\nRespond using exactly this block format, nothing before or after:\n\n\
===MARKET_MOOD===\n\
bullish|bearish|neutral|mixed\n\
===END_MOOD===\n\
===TRENDING_TICKERS===\n\
AAA, BBB, CCC\n\
===END_TICKERS===\n\
===SECTOR_MOMENTUM===\n\
Technology: bullish\n\
Finance: neutral\n\
===END_SECTORS===\n\
===CAUTION_FLAGS===\n\
- item\n\
===END_CAUTIONS===\n\
===NARRATIVE===\n\
...\n\
===END_NARRATIVE===\n",
    );
    p
}

/// Build the Phase 2 pick-selection prompt (spec §4.7 Phase 2, §6.3
/// "Selection response"). Encodes the trade-shape constraints the model
/// must respect and nudges toward credit spreads and sector diversification
/// without hard-enforcing either — enforcement happens in Phase 3.
pub fn build_selection_prompt(
    candidates: &[String],
    market_mood: &str,
    narrative: &str,
    performance_context: &str,
    allowed_strategies: &[Strategy],
    min_dte: i64,
    max_dte: i64,
    min_spread_width: f64,
    slots_available: i64,
    max_per_sector: i64,
    margin_committed: f64,
    margin_available: f64,
) -> String {
    let allowed: Vec<&str> = allowed_strategies.iter().map(|s| s.as_str()).collect();
    let mut p = String::new();
    p.push_str("You are selecting option trades for a paper-trading account. Market mood: ");
    p.push_str(market_mood);
    p.push_str("\n\n");
    p.push_str(narrative);
    p.push_str("\n\nCandidate tickers:\n");
    p.push_str(&candidates.join(", "));
    p.push_str("\n\n");
    p.push_str(performance_context);
    p.push_str(&format!(
        "\nConstraints:\n\
- Allowed strategies: {}\n\
- DTE must be between {} and {} days\n\
- For credit_spread picks, spread_width must be at least ${:.2}\n\
- Select at most {} trades\n\
- Prefer at least 3 of every 5 picks to be credit_spread for defined risk\n\
- Diversify across sectors: at least 3 distinct sectors across every 5 picks, no more than {} positions per sector\n\
- Currently committed margin is ${:.2}, with ${:.2} of headroom remaining before the cap; do not propose trades that would plainly exceed that headroom\n\n",
        allowed.join(", "),
        min_dte,
        max_dte,
        min_spread_width,
        slots_available,
        max_per_sector,
        margin_committed,
        margin_available,
    ));
    p.push_str(
        "Respond with one block per trade, in exactly this format, nothing before or after:\n\n\
===TRADE_1===\n\
TICKER: AAA\n\
STRATEGY: credit_spread\n\
STRIKE: 180\n\
EXPIRY: YYYY-MM-DD\n\
DTE: 38\n\
CONTRACTS: 1\n\
ESTIMATED_PREMIUM: 1.20\n\
SPREAD_WIDTH: 5\n\
STRIKE_SELL: 180\n\
STRIKE_BUY: 175\n\
CONFIDENCE: 78\n\
SECTOR: Tech\n\
RATIONALE: ...\n\
===END_TRADE_1===\n\n\
If no trade meets the bar, respond with no blocks at all.",
    );
    p
}

/// Build the Phase 5 post-close review prompt (spec §4.7 Phase 5, §6.3
/// "Review response").
pub fn build_review_prompt(
    ticker: &str,
    strategy: &str,
    entry_price: f64,
    exit_price: f64,
    entry_spot: f64,
    exit_spot: f64,
    exit_reason: &str,
    pnl_dollars: f64,
    pnl_percent: f64,
    ai_rationale: Option<&str>,
) -> String {
    let mut p = String::new();
    p.push_str("Review this closed options trade and extract a lesson.\n\n");
    p.push_str(&format!(
        "Ticker: {ticker}\nStrategy: {strategy}\nEntry price: {entry_price:.2}\nExit price: {exit_price:.2}\nEntry spot: {entry_spot:.2}\nExit spot: {exit_spot:.2}\nExit reason: {exit_reason}\nP&L: ${pnl_dollars:.2} ({pnl_percent:.1}%)\n",
    ));
    if let Some(rationale) = ai_rationale {
        p.push_str(&format!("Original rationale: {rationale}\n"));
    }
    p.push_str(
        "\nRespond using exactly this block format, nothing before or after:\n\n\
===REVIEW===\n\
WHAT_WORKED: ...\n\
WHAT_FAILED: ...\n\
LESSON: ...\n\
SHOULD_REPEAT: YES|NO\n\
NEW_RULE: ... | NONE\n\
RULE_CATEGORY: entry|exit|risk|sector|timing|general\n\
FULL_REVIEW: ...\n\
===END_REVIEW===\n",
    );
    p
}

/// Build the end-of-day reflection prompt (spec §4.7 Phase 5). Free-form
/// text response, no delimited grammar — the whole response is stored
/// verbatim as the day's reflection.
pub fn build_reflection_prompt(metrics: &PerformanceMetrics, active_rule_count: usize) -> String {
    format!(
        "Write a brief end-of-day reflection for an autonomous options trading account.\n\n\
Trades today's trailing window: {} | Win rate: {:.1}% | Total P&L: ${:.2} | Profit factor: {:.2}\n\
Active learned rules currently in effect: {}\n\n\
Summarize what went well, what to watch tomorrow, and whether the current rule set still seems sound. Three to five sentences.",
        metrics.total_trades, metrics.win_rate, metrics.total_pnl, metrics.profit_factor, active_rule_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_prompt_includes_block_markers() {
        let prompt = build_scan_prompt(Some(14.2), Some(512.3));
        assert!(prompt.contains("===MARKET_MOOD==="));
        assert!(prompt.contains("===END_NARRATIVE==="));
        assert!(prompt.contains("14.20"));
    }

    #[test]
    fn scan_prompt_omits_missing_snapshot_fields() {
        let prompt = build_scan_prompt(None, None);
        assert!(!prompt.contains("Current VIX"));
        assert!(!prompt.contains("Current SPY"));
    }

    #[test]
    fn selection_prompt_lists_constraints() {
        let prompt = build_selection_prompt(
            &["AAPL".to_string(), "MSFT".to_string()],
            "bullish",
            "tech strength continues",
            "=== PERFORMANCE ===\n",
            &[Strategy::CreditSpread, Strategy::ShortPut],
            1,
            45,
            5.0,
            3,
            2,
            1_200.0,
            68_800.0,
        );
        assert!(prompt.contains("credit_spread, short_put"));
        assert!(prompt.contains("between 1 and 45 days"));
        assert!(prompt.contains("at most 3 trades"));
        assert!(prompt.contains("===TRADE_1==="));
        assert!(prompt.contains("$1200.00"));
    }

    #[test]
    fn review_prompt_embeds_trade_numbers() {
        let prompt = build_review_prompt(
            "AAPL",
            "credit_spread",
            1.2,
            0.6,
            450.0,
            460.0,
            "profit_target",
            60.0,
            50.0,
            Some("bullish momentum"),
        );
        assert!(prompt.contains("AAPL"));
        assert!(prompt.contains("$60.00"));
        assert!(prompt.contains("Entry spot: 450.00"));
        assert!(prompt.contains("Exit spot: 460.00"));
        assert!(prompt.contains("===REVIEW==="));
    }

    #[test]
    fn reflection_prompt_mentions_rule_count() {
        let metrics = PerformanceMetrics {
            total_trades: 4,
            win_rate: 75.0,
            total_pnl: 210.0,
            avg_win: 80.0,
            avg_loss: -40.0,
            profit_factor: 2.0,
            by_strategy: Vec::new(),
            by_ticker: Vec::new(),
            best_trade: None,
            worst_trade: None,
            pnl_by_exit_date: Vec::new(),
        };
        let prompt = build_reflection_prompt(&metrics, 6);
        assert!(prompt.contains("Active learned rules currently in effect: 6"));
    }
}
