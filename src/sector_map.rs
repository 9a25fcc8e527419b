// =============================================================================
// Curated ticker -> sector map (spec §4.8, §9 "Sector map")
// =============================================================================
//
// A small static table of curated tickers. Unknown tickers fall back to
// "Unknown" and are still accounted for against `max_per_sector` in that
// bucket.
// =============================================================================

/// Built-in candidate ticker pool unioned with the AI's trending picks in
/// Phase 2 (spec §4.7 "candidate pool").
pub const CURATED_CANDIDATES: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "META", "NVDA", "TSLA", "AMD", "NFLX", "CRM",
    "JPM", "BAC", "GS", "MS", "WFC", "C", "AXP", "SCHW",
    "XOM", "CVX", "COP", "SLB",
    "JNJ", "PFE", "UNH", "ABBV", "MRK", "LLY",
    "PG", "KO", "PEP", "WMT", "COST", "HD", "MCD",
    "BA", "CAT", "GE", "HON", "UPS",
    "DIS", "CMCSA", "T", "VZ",
    "XLE", "XLF", "XLK", "XLV", "SPY", "QQQ", "IWM",
];

const SECTOR_TABLE: &[(&str, &str)] = &[
    ("AAPL", "Technology"),
    ("MSFT", "Technology"),
    ("GOOGL", "Technology"),
    ("AMZN", "Consumer Discretionary"),
    ("META", "Technology"),
    ("NVDA", "Technology"),
    ("TSLA", "Consumer Discretionary"),
    ("AMD", "Technology"),
    ("NFLX", "Communication Services"),
    ("CRM", "Technology"),
    ("JPM", "Finance"),
    ("BAC", "Finance"),
    ("GS", "Finance"),
    ("MS", "Finance"),
    ("WFC", "Finance"),
    ("C", "Finance"),
    ("AXP", "Finance"),
    ("SCHW", "Finance"),
    ("XOM", "Energy"),
    ("CVX", "Energy"),
    ("COP", "Energy"),
    ("SLB", "Energy"),
    ("JNJ", "Healthcare"),
    ("PFE", "Healthcare"),
    ("UNH", "Healthcare"),
    ("ABBV", "Healthcare"),
    ("MRK", "Healthcare"),
    ("LLY", "Healthcare"),
    ("PG", "Consumer Staples"),
    ("KO", "Consumer Staples"),
    ("PEP", "Consumer Staples"),
    ("WMT", "Consumer Staples"),
    ("COST", "Consumer Staples"),
    ("HD", "Consumer Discretionary"),
    ("MCD", "Consumer Discretionary"),
    ("BA", "Industrials"),
    ("CAT", "Industrials"),
    ("GE", "Industrials"),
    ("HON", "Industrials"),
    ("UPS", "Industrials"),
    ("DIS", "Communication Services"),
    ("CMCSA", "Communication Services"),
    ("T", "Communication Services"),
    ("VZ", "Communication Services"),
    ("XLE", "Energy"),
    ("XLF", "Finance"),
    ("XLK", "Technology"),
    ("XLV", "Healthcare"),
    ("SPY", "Index"),
    ("QQQ", "Index"),
    ("IWM", "Index"),
];

/// Look up the curated sector for a ticker, falling back to "Unknown" when
/// the ticker is not in the table (spec §4.8, §9).
pub fn sector_for(ticker: &str) -> String {
    let upper = ticker.trim().to_uppercase();
    SECTOR_TABLE
        .iter()
        .find(|(t, _)| *t == upper)
        .map(|(_, sector)| sector.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
