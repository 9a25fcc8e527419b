// =============================================================================
// Parsers (C6) — lenient, non-throwing readers for the §6.3 LLM grammars
// =============================================================================
//
// Free-text model output is never trusted to be well-formed. Every function
// here returns a partial record (fields default to `None`/empty) rather than
// an `Err` — a malformed block is simply dropped, never panics, never
// propagates.
// =============================================================================

use crate::types::{MarketMood, Strategy};

/// Recovered fields from a morning scan response (spec §6.3 "Scan
/// response", §4.6 "Scan parser").
#[derive(Debug, Clone, Default)]
pub struct ParsedScan {
    pub market_mood: MarketMood,
    pub trending_tickers: Vec<String>,
    pub sector_momentum: Vec<(String, String)>,
    pub caution_flags: Vec<String>,
    pub narrative: String,
}

fn extract_block(text: &str, start: &str, end: &str) -> Option<String> {
    let start_idx = text.find(start)? + start.len();
    let rest = &text[start_idx..];
    let end_idx = rest.find(end)?;
    Some(rest[..end_idx].trim().to_string())
}

/// Parse a morning-scan response. Missing sections degrade to defaults
/// (neutral mood, empty lists) rather than failing the caller (spec §7
/// "Degraded").
pub fn parse_scan(raw: &str) -> ParsedScan {
    let market_mood = extract_block(raw, "===MARKET_MOOD===", "===END_MOOD===")
        .and_then(|m| MarketMood::parse(&m))
        .unwrap_or_default();

    let trending_tickers = extract_block(raw, "===TRENDING_TICKERS===", "===END_TICKERS===")
        .map(|block| {
            block
                .split(|c: char| c == ',' || c == '\n')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty() && s.len() <= 5)
                .collect()
        })
        .unwrap_or_default();

    let sector_momentum = extract_block(raw, "===SECTOR_MOMENTUM===", "===END_SECTORS===")
        .map(|block| {
            block
                .lines()
                .filter_map(|line| {
                    let (name, direction) = line.split_once(':')?;
                    Some((name.trim().to_string(), direction.trim().to_lowercase()))
                })
                .collect()
        })
        .unwrap_or_default();

    let caution_flags = extract_block(raw, "===CAUTION_FLAGS===", "===END_CAUTIONS===")
        .map(|block| {
            block
                .lines()
                .map(|l| l.trim())
                .filter(|l| l.starts_with('-'))
                .map(|l| l.trim_start_matches('-').trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let narrative = extract_block(raw, "===NARRATIVE===", "===END_NARRATIVE===").unwrap_or_default();

    ParsedScan {
        market_mood,
        trending_tickers,
        sector_momentum,
        caution_flags,
        narrative,
    }
}

/// A recovered trade pick, fields loosely coerced (spec §6.3 "Selection
/// response", §4.6 "Selection parser"). `strategy` is required to parse;
/// everything else is best-effort.
#[derive(Debug, Clone)]
pub struct ParsedPick {
    pub ticker: String,
    pub strategy: Strategy,
    pub strike: Option<f64>,
    pub expiry: Option<String>,
    pub dte: Option<i64>,
    pub contracts: Option<i64>,
    pub estimated_premium: Option<f64>,
    pub spread_width: Option<f64>,
    pub strike_sell: Option<f64>,
    pub strike_buy: Option<f64>,
    pub confidence: Option<f64>,
    pub sector: Option<String>,
    pub rationale: Option<String>,
}

fn strip_numeric_noise(s: &str) -> &str {
    s.trim().trim_start_matches(['$', '%']).trim()
}

fn field_value(block: &str, key: &str) -> Option<String> {
    block.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k.trim().eq_ignore_ascii_case(key) {
            Some(v.trim().to_string())
        } else {
            None
        }
    })
}

fn parse_pick_block(block: &str) -> Option<ParsedPick> {
    let ticker = field_value(block, "TICKER")?.to_uppercase();
    let strategy = Strategy::parse(&field_value(block, "STRATEGY")?)?;

    let parse_f64 = |key: &str| field_value(block, key).and_then(|v| strip_numeric_noise(&v).parse::<f64>().ok());
    let parse_i64 = |key: &str| field_value(block, key).and_then(|v| strip_numeric_noise(&v).parse::<i64>().ok());

    let mut strike = parse_f64("STRIKE");
    let strike_sell = parse_f64("STRIKE_SELL");
    let strike_buy = parse_f64("STRIKE_BUY");
    if strike.is_none() {
        strike = strike_sell;
    }

    Some(ParsedPick {
        ticker,
        strategy,
        strike,
        expiry: field_value(block, "EXPIRY"),
        dte: parse_i64("DTE"),
        contracts: parse_i64("CONTRACTS"),
        estimated_premium: parse_f64("ESTIMATED_PREMIUM"),
        spread_width: parse_f64("SPREAD_WIDTH"),
        strike_sell,
        strike_buy,
        confidence: parse_f64("CONFIDENCE"),
        sector: field_value(block, "SECTOR"),
        rationale: field_value(block, "RATIONALE"),
    })
}

/// Parse a selection response, trying three progressively looser framings
/// in order (spec §4.6 "Selection parser"). Each candidate block that lacks
/// a `TICKER` or a recognizable `STRATEGY` is discarded, never causing the
/// whole response to fail (spec §8 property 10).
pub fn parse_selection(raw: &str) -> Vec<ParsedPick> {
    // Tier 1: ===TRADE_N=== ... ===END_TRADE_N===
    let mut picks = Vec::new();
    let mut cursor = raw;
    let mut found_any_delimited = false;
    while let Some(start_idx) = cursor.find("===TRADE_") {
        let after_marker = &cursor[start_idx..];
        let Some(marker_end) = after_marker.find("===\n").or_else(|| after_marker.find("===\r\n")) else {
            break;
        };
        let header = &after_marker[..marker_end];
        let body_start = marker_end + 3;
        let end_tag = format!("===END_{}===", header.trim_start_matches("==="));
        let body = &after_marker[body_start..];
        if let Some(end_idx) = body.find(&end_tag) {
            found_any_delimited = true;
            if let Some(pick) = parse_pick_block(&body[..end_idx]) {
                picks.push(pick);
            }
            cursor = &body[end_idx + end_tag.len()..];
        } else {
            // Tier 2: no end marker — this block runs until the next
            // ===TRADE_ marker or end of text.
            let next_marker = body.find("===TRADE_").unwrap_or(body.len());
            if let Some(pick) = parse_pick_block(&body[..next_marker]) {
                picks.push(pick);
                found_any_delimited = true;
            }
            cursor = &body[next_marker..];
            if next_marker == 0 {
                break;
            }
        }
    }
    if found_any_delimited {
        return picks;
    }

    // Tier 3: split on standalone TICKER: lines.
    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in raw.lines() {
        if line.trim_start().to_uppercase().starts_with("TICKER:") && !current.trim().is_empty() {
            blocks.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        blocks.push(current);
    }
    blocks.into_iter().filter_map(|b| parse_pick_block(&b)).collect()
}

/// Recovered fields from a post-close review response (spec §6.3 "Review
/// response", §4.6 "Review parser").
#[derive(Debug, Clone, Default)]
pub struct ParsedReview {
    pub what_worked: Option<String>,
    pub what_failed: Option<String>,
    pub lesson: Option<String>,
    pub should_repeat: Option<bool>,
    pub new_rule: Option<String>,
    pub rule_category: Option<String>,
    pub full_review: Option<String>,
}

pub fn parse_review(raw: &str) -> ParsedReview {
    let block = extract_block(raw, "===REVIEW===", "===END_REVIEW===").unwrap_or_else(|| raw.to_string());

    let should_repeat = field_value(&block, "SHOULD_REPEAT").map(|v| v.eq_ignore_ascii_case("yes"));
    let new_rule = field_value(&block, "NEW_RULE").filter(|v| !v.eq_ignore_ascii_case("none"));

    ParsedReview {
        what_worked: field_value(&block, "WHAT_WORKED"),
        what_failed: field_value(&block, "WHAT_FAILED"),
        lesson: field_value(&block, "LESSON"),
        should_repeat,
        new_rule,
        rule_category: field_value(&block, "RULE_CATEGORY"),
        full_review: field_value(&block, "FULL_REVIEW"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_parser_recovers_all_sections() {
        let raw = "\
===MARKET_MOOD===\nbullish\n===END_MOOD===\n\
===TRENDING_TICKERS===\nAAPL, MSFT\nNVDA\n===END_TICKERS===\n\
===SECTOR_MOMENTUM===\nTechnology: bullish\nFinance: neutral\n===END_SECTORS===\n\
===CAUTION_FLAGS===\n- fed meeting tomorrow\n- earnings season\n===END_CAUTIONS===\n\
===NARRATIVE===\ntech strength continues\n===END_NARRATIVE===\n";
        let parsed = parse_scan(raw);
        assert_eq!(parsed.market_mood, MarketMood::Bullish);
        assert_eq!(parsed.trending_tickers, vec!["AAPL", "MSFT", "NVDA"]);
        assert_eq!(parsed.sector_momentum.len(), 2);
        assert_eq!(parsed.caution_flags.len(), 2);
        assert_eq!(parsed.narrative, "tech strength continues");
    }

    #[test]
    fn scan_parser_degrades_on_missing_sections() {
        let parsed = parse_scan("nothing useful here");
        assert_eq!(parsed.market_mood, MarketMood::Neutral);
        assert!(parsed.trending_tickers.is_empty());
    }

    #[test]
    fn scan_parser_rejects_overlong_tickers() {
        let raw = "===TRENDING_TICKERS===\nAAPL, NOTATICKER\n===END_TICKERS===\n";
        let parsed = parse_scan(raw);
        assert_eq!(parsed.trending_tickers, vec!["AAPL"]);
    }

    #[test]
    fn selection_parser_handles_well_formed_blocks() {
        let raw = "\
===TRADE_1===\nTICKER: AAA\nSTRATEGY: credit_spread\nSTRIKE: 180\nSPREAD_WIDTH: 5\n===END_TRADE_1===\n\
===TRADE_2===\nTICKER: BBB\nSTRATEGY: short_put\nSTRIKE: 90\n===END_TRADE_2===\n";
        let picks = parse_selection(raw);
        assert_eq!(picks.len(), 2);
        assert_eq!(picks[0].ticker, "AAA");
        assert_eq!(picks[1].strategy, Strategy::ShortPut);
    }

    #[test]
    fn selection_parser_tolerates_dollar_and_percent_noise() {
        let raw = "===TRADE_1===\nTICKER: AAA\nSTRATEGY: credit_spread\nSTRIKE: $180\nCONFIDENCE: 78%\n===END_TRADE_1===\n";
        let picks = parse_selection(raw);
        assert_eq!(picks[0].strike, Some(180.0));
        assert_eq!(picks[0].confidence, Some(78.0));
    }

    #[test]
    fn selection_parser_discards_blocks_missing_required_fields() {
        let raw = "===TRADE_1===\nSTRATEGY: credit_spread\nSTRIKE: 180\n===END_TRADE_1===\n\
===TRADE_2===\nTICKER: BBB\nSTRATEGY: short_put\n===END_TRADE_2===\n";
        let picks = parse_selection(raw);
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].ticker, "BBB");
    }

    #[test]
    fn selection_parser_falls_back_without_end_markers() {
        let raw = "===TRADE_1===\nTICKER: AAA\nSTRATEGY: credit_spread\nSTRIKE: 180\n\
===TRADE_2===\nTICKER: BBB\nSTRATEGY: short_put\nSTRIKE: 90\n";
        let picks = parse_selection(raw);
        assert_eq!(picks.len(), 2);
    }

    #[test]
    fn selection_parser_falls_back_to_ticker_line_split() {
        let raw = "Here are my picks.\nTICKER: AAA\nSTRATEGY: credit_spread\nSTRIKE: 180\n\nTICKER: BBB\nSTRATEGY: short_put\nSTRIKE: 90\n";
        let picks = parse_selection(raw);
        assert_eq!(picks.len(), 2);
    }

    #[test]
    fn selection_parser_normalizes_strike_from_strike_sell() {
        let raw = "===TRADE_1===\nTICKER: AAA\nSTRATEGY: credit_spread\nSTRIKE_SELL: 180\nSTRIKE_BUY: 175\n===END_TRADE_1===\n";
        let picks = parse_selection(raw);
        assert_eq!(picks[0].strike, Some(180.0));
    }

    #[test]
    fn review_parser_recovers_fields() {
        let raw = "===REVIEW===\nWHAT_WORKED: entry timing\nWHAT_FAILED: held too long\nLESSON: manage dte sooner\nSHOULD_REPEAT: NO\nNEW_RULE: exit at 15 dte\nRULE_CATEGORY: exit\nFULL_REVIEW: overall decent\n===END_REVIEW===\n";
        let review = parse_review(raw);
        assert_eq!(review.should_repeat, Some(false));
        assert_eq!(review.new_rule.as_deref(), Some("exit at 15 dte"));
        assert_eq!(review.rule_category.as_deref(), Some("exit"));
    }

    #[test]
    fn review_parser_treats_none_as_no_rule() {
        let raw = "===REVIEW===\nNEW_RULE: NONE\n===END_REVIEW===\n";
        let review = parse_review(raw);
        assert!(review.new_rule.is_none());
    }
}
