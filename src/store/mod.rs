// =============================================================================
// Store (C1) — durable persistence for trades, scans, reviews, summaries,
// learned rules, and config
// =============================================================================
//
// Backed by SQLite via `sqlx`, matching the ecosystem choice the rest of this
// corpus reaches for when a tokio-async trading service needs a local
// database (no brokerage or exchange credentials here, so there is nothing to
// sign — this module owns persistence, not network I/O).
//
// Every mutation runs inside its own transaction so writers never observe a
// torn trade/review/summary record (spec §4.1 "every mutation is
// serialized"). Schema evolution is additive only: `init` creates tables
// that do not yet exist and never drops or renames a column.
// =============================================================================

pub mod models;

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::types::{ExitReason, Strategy, TradeStatus};
pub use models::*;

/// Default values for every §6.1 config key, used both to seed a fresh store
/// and as the fallback when a key is present but fails to coerce.
pub const CONFIG_DEFAULTS: &[(&str, &str)] = &[
    ("enabled", "false"),
    ("paper_balance", "100000"),
    ("max_positions", "5"),
    ("max_daily_risk_pct", "20"),
    ("max_margin_pct", "70"),
    ("max_per_sector", "2"),
    ("stop_loss_multiplier", "2"),
    ("profit_target_pct", "50"),
    ("min_dte", "1"),
    ("max_dte", "45"),
    ("manage_dte", "21"),
    (
        "allowed_strategies",
        "[\"short_put\",\"credit_spread\",\"covered_call\"]",
    ),
    ("min_spread_width", "5"),
    ("monitor_interval_sec", "30"),
    ("morning_scan_time", "06:00"),
    ("analysis_time", "07:00"),
    ("execution_time", "09:31"),
    ("eod_review_time", "16:01"),
    ("reflection_time", "16:30"),
    ("deepseek_model", "deepseek-r1:70b"),
    ("grok_model", "grok-4"),
];

/// Durable persistence layer. Cheap to clone (wraps a pooled connection).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `path` and run
    /// schema initialization. Returns `TraderError::Fatal` territory to the
    /// caller as a plain `anyhow::Error` — main.rs refuses to enable the
    /// trader if this fails (spec §7 "Fatal").
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .with_context(|| format!("invalid sqlite path {path}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to open store database")?;

        let store = Self { pool };
        store.init().await?;
        info!(path, "store opened and initialized");
        Ok(store)
    }

    /// In-memory store, used by tests and anywhere a throwaway instance is
    /// wanted (e.g. a dry-run CLI invocation).
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory store")?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                strategy TEXT NOT NULL,
                direction TEXT NOT NULL,
                sector TEXT NOT NULL,
                strike REAL NOT NULL,
                strike_sell REAL,
                strike_buy REAL,
                spread_width REAL,
                expiry TEXT NOT NULL,
                dte INTEGER NOT NULL,
                contracts INTEGER NOT NULL,
                entry_price REAL NOT NULL,
                entry_date TEXT NOT NULL,
                entry_spot REAL NOT NULL,
                entry_iv REAL,
                entry_delta REAL,
                exit_price REAL,
                exit_date TEXT,
                exit_spot REAL,
                exit_reason TEXT,
                pnl_dollars REAL,
                pnl_percent REAL,
                max_profit REAL NOT NULL,
                max_loss REAL NOT NULL,
                market_scan_id INTEGER,
                ai_rationale TEXT,
                ai_confidence REAL,
                model_used TEXT,
                stop_loss_price REAL NOT NULL,
                profit_target_price REAL NOT NULL,
                status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);
            CREATE INDEX IF NOT EXISTS idx_trades_ticker ON trades(ticker);
            CREATE INDEX IF NOT EXISTS idx_trades_entry_date ON trades(entry_date);

            CREATE TABLE IF NOT EXISTS market_scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_date TEXT NOT NULL UNIQUE,
                market_mood TEXT NOT NULL,
                trending_tickers TEXT NOT NULL,
                sector_momentum TEXT NOT NULL,
                caution_flags TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                vix REAL,
                spy_price REAL,
                candidate_pool TEXT,
                selected_picks TEXT,
                sentiment_model TEXT,
                analysis_model TEXT
            );

            CREATE TABLE IF NOT EXISTS trade_reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id INTEGER NOT NULL UNIQUE,
                raw_text TEXT NOT NULL,
                lesson TEXT,
                what_worked TEXT,
                what_failed TEXT,
                should_repeat INTEGER,
                model_used TEXT
            );

            CREATE TABLE IF NOT EXISTS daily_summaries (
                summary_date TEXT PRIMARY KEY,
                opens INTEGER NOT NULL,
                closes INTEGER NOT NULL,
                wins INTEGER NOT NULL,
                losses INTEGER NOT NULL,
                total_pnl REAL NOT NULL,
                account_value REAL NOT NULL,
                capital_at_risk REAL NOT NULL,
                reflection TEXT
            );

            CREATE TABLE IF NOT EXISTS learned_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_text TEXT NOT NULL,
                category TEXT NOT NULL,
                source_trade_ids TEXT NOT NULL,
                confidence REAL NOT NULL,
                times_applied INTEGER NOT NULL DEFAULT 0,
                times_helpful INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create schema")?;

        for (key, value) in CONFIG_DEFAULTS {
            sqlx::query("INSERT OR IGNORE INTO config (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to seed config default for {key}"))?;
        }

        Ok(())
    }

    /// Whether the store is usable. Backs the Control Surface's degraded
    /// state check and the Monitor's guard.
    pub async fn is_ready(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Close the connection pool, letting in-flight queries finish first.
    /// Called once on graceful shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------

    /// Insert a new trade. Re-checks invariants I2–I4 inside the same
    /// transaction as a defense-in-depth backstop — Phase 3 is expected to
    /// have already screened the pick, but the Store is the sole owner of
    /// these invariants (spec §3) and must never persist a violation.
    pub async fn insert_trade(
        &self,
        draft: TradeDraft,
        max_per_sector: i64,
        allowed_strategies: &[Strategy],
    ) -> Result<i64> {
        if !allowed_strategies.contains(&draft.strategy) {
            anyhow::bail!(
                "strategy {} is not in allowed_strategies (I4)",
                draft.strategy
            );
        }
        if draft.stop_loss_price <= draft.entry_price || draft.profit_target_price >= draft.entry_price {
            anyhow::bail!("trigger monotonicity violated (I5) for {}", draft.ticker);
        }

        let mut tx = self.pool.begin().await?;

        let dup: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM trades WHERE ticker = ? AND status = 'open' LIMIT 1",
        )
        .bind(&draft.ticker)
        .fetch_optional(&mut *tx)
        .await?;
        if dup.is_some() {
            anyhow::bail!("duplicate open trade for ticker {} (I2)", draft.ticker);
        }

        let sector_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trades WHERE sector = ? AND status = 'open'",
        )
        .bind(&draft.sector)
        .fetch_one(&mut *tx)
        .await?;
        if sector_count >= max_per_sector {
            anyhow::bail!("sector cap reached for {} (I3)", draft.sector);
        }

        let id: i64 = sqlx::query(
            r#"
            INSERT INTO trades (
                ticker, strategy, direction, sector, strike, strike_sell, strike_buy,
                spread_width, expiry, dte, contracts, entry_price, entry_date, entry_spot,
                entry_iv, entry_delta, max_profit, max_loss, market_scan_id, ai_rationale,
                ai_confidence, model_used, stop_loss_price, profit_target_price, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'open')
            "#,
        )
        .bind(&draft.ticker)
        .bind(draft.strategy.as_str())
        .bind(draft.direction)
        .bind(&draft.sector)
        .bind(draft.strike)
        .bind(draft.strike_sell)
        .bind(draft.strike_buy)
        .bind(draft.spread_width)
        .bind(draft.expiry.to_string())
        .bind(draft.dte)
        .bind(draft.contracts)
        .bind(draft.entry_price)
        .bind(draft.entry_date.to_string())
        .bind(draft.entry_spot)
        .bind(draft.entry_iv)
        .bind(draft.entry_delta)
        .bind(draft.max_profit)
        .bind(draft.max_loss)
        .bind(draft.market_scan_id)
        .bind(&draft.ai_rationale)
        .bind(draft.ai_confidence)
        .bind(&draft.model_used)
        .bind(draft.stop_loss_price)
        .bind(draft.profit_target_price)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        info!(id, ticker = %draft.ticker, strategy = %draft.strategy, "trade inserted");
        Ok(id)
    }

    /// Close an open trade (spec §4.1 `closeTrade`). A no-op `Ok(())` if the
    /// trade is already closed — callers are expected to check `is_open`
    /// first, but this keeps the closure idempotent per spec §8 property 7.
    pub async fn close_trade(&self, id: i64, exit: ExitData) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET
                exit_price = ?, exit_date = ?, exit_spot = ?, exit_reason = ?,
                pnl_dollars = ?, pnl_percent = ?, status = 'closed'
            WHERE id = ? AND status = 'open'
            "#,
        )
        .bind(exit.exit_price)
        .bind(exit.exit_date.to_string())
        .bind(exit.exit_spot)
        .bind(exit.exit_reason.as_str())
        .bind(exit.pnl_dollars)
        .bind(exit.pnl_percent)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(id, "close_trade called on a non-open trade — ignored");
        } else {
            info!(id, reason = %exit.exit_reason, pnl = exit.pnl_dollars, "trade closed");
        }
        Ok(())
    }

    pub async fn get_open_trades(&self) -> Result<Vec<Trade>> {
        let trades = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE status = 'open' ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    pub async fn get_closed_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let trades = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE status = 'closed' ORDER BY exit_date DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    pub async fn get_trade(&self, id: i64) -> Result<Option<Trade>> {
        let trade = sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(trade)
    }

    pub async fn get_all_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let trades = sqlx::query_as::<_, Trade>("SELECT * FROM trades ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(trades)
    }

    pub async fn get_trades_by_ticker(&self, ticker: &str, limit: i64) -> Result<Vec<Trade>> {
        let trades = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE ticker = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(ticker)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    /// Trades opened on a given calendar date, used by Phase 4's daily
    /// summary (spec §4.7 "counts of opens, closes").
    pub async fn get_trades_opened_on(&self, date: NaiveDate) -> Result<Vec<Trade>> {
        let trades = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE entry_date = ? ORDER BY id ASC",
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    /// Trades closed on a given calendar date, used by Phase 4's daily
    /// summary and Phase 5's per-trade review pass (spec §4.7).
    pub async fn get_trades_closed_on(&self, date: NaiveDate) -> Result<Vec<Trade>> {
        let trades = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE exit_date = ? ORDER BY id ASC",
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    // -------------------------------------------------------------------
    // Market scans
    // -------------------------------------------------------------------

    /// Upsert by date — exactly one scan exists per date (spec §3 invariant).
    pub async fn upsert_market_scan(&self, scan: &NewMarketScan) -> Result<i64> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO market_scans (
                scan_date, market_mood, trending_tickers, sector_momentum, caution_flags,
                raw_text, vix, spy_price, candidate_pool, selected_picks, sentiment_model,
                analysis_model
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(scan_date) DO UPDATE SET
                market_mood = excluded.market_mood,
                trending_tickers = excluded.trending_tickers,
                sector_momentum = excluded.sector_momentum,
                caution_flags = excluded.caution_flags,
                raw_text = excluded.raw_text,
                vix = excluded.vix,
                spy_price = excluded.spy_price,
                candidate_pool = COALESCE(excluded.candidate_pool, market_scans.candidate_pool),
                selected_picks = COALESCE(excluded.selected_picks, market_scans.selected_picks),
                sentiment_model = excluded.sentiment_model,
                analysis_model = COALESCE(excluded.analysis_model, market_scans.analysis_model)
            "#,
        )
        .bind(scan.scan_date.to_string())
        .bind(scan.market_mood.as_str())
        .bind(&scan.trending_tickers)
        .bind(&scan.sector_momentum)
        .bind(&scan.caution_flags)
        .bind(&scan.raw_text)
        .bind(scan.vix)
        .bind(scan.spy_price)
        .bind(&scan.candidate_pool)
        .bind(&scan.selected_picks)
        .bind(&scan.sentiment_model)
        .bind(&scan.analysis_model)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        // SQLite's last_insert_rowid() on an ON CONFLICT UPDATE path returns
        // the existing id, not 0 — but fetch explicitly to be certain.
        let row_id: i64 = sqlx::query_scalar("SELECT id FROM market_scans WHERE scan_date = ?")
            .bind(scan.scan_date.to_string())
            .fetch_one(&self.pool)
            .await?;
        let _ = id;
        Ok(row_id)
    }

    /// Persist just the selected picks for a given date's scan (Phase 2's
    /// write-back of its picks onto today's MarketScan, spec §4.7).
    pub async fn set_market_scan_picks(&self, scan_date: NaiveDate, picks_json: &str) -> Result<()> {
        sqlx::query("UPDATE market_scans SET selected_picks = ? WHERE scan_date = ?")
            .bind(picks_json)
            .bind(scan_date.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_market_scan(&self, date: NaiveDate) -> Result<Option<MarketScan>> {
        let scan = sqlx::query_as::<_, MarketScan>(
            "SELECT * FROM market_scans WHERE scan_date = ?",
        )
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(scan)
    }

    pub async fn get_latest_market_scan(&self) -> Result<Option<MarketScan>> {
        let scan = sqlx::query_as::<_, MarketScan>(
            "SELECT * FROM market_scans ORDER BY scan_date DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(scan)
    }

    // -------------------------------------------------------------------
    // Trade reviews
    // -------------------------------------------------------------------

    /// At most one review per trade — skip if present (spec §3 invariant).
    pub async fn insert_trade_review(&self, review: &NewTradeReview) -> Result<Option<i64>> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM trade_reviews WHERE trade_id = ?")
                .bind(review.trade_id)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Ok(None);
        }

        let id = sqlx::query(
            r#"
            INSERT INTO trade_reviews (
                trade_id, raw_text, lesson, what_worked, what_failed, should_repeat, model_used
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(review.trade_id)
        .bind(&review.raw_text)
        .bind(&review.lesson)
        .bind(&review.what_worked)
        .bind(&review.what_failed)
        .bind(review.should_repeat)
        .bind(&review.model_used)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Some(id))
    }

    pub async fn get_trade_reviews(&self, trade_id: i64) -> Result<Vec<TradeReview>> {
        let reviews = sqlx::query_as::<_, TradeReview>(
            "SELECT * FROM trade_reviews WHERE trade_id = ?",
        )
        .bind(trade_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    // -------------------------------------------------------------------
    // Daily summaries
    // -------------------------------------------------------------------

    pub async fn upsert_daily_summary(&self, summary: &DailySummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_summaries (
                summary_date, opens, closes, wins, losses, total_pnl, account_value,
                capital_at_risk, reflection
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(summary_date) DO UPDATE SET
                opens = excluded.opens,
                closes = excluded.closes,
                wins = excluded.wins,
                losses = excluded.losses,
                total_pnl = excluded.total_pnl,
                account_value = excluded.account_value,
                capital_at_risk = excluded.capital_at_risk,
                reflection = COALESCE(excluded.reflection, daily_summaries.reflection)
            "#,
        )
        .bind(summary.summary_date.to_string())
        .bind(summary.opens)
        .bind(summary.closes)
        .bind(summary.wins)
        .bind(summary.losses)
        .bind(summary.total_pnl)
        .bind(summary.account_value)
        .bind(summary.capital_at_risk)
        .bind(&summary.reflection)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach the reflection text produced by Phase 5 onto today's summary.
    pub async fn set_daily_reflection(&self, date: NaiveDate, reflection: &str) -> Result<()> {
        sqlx::query("UPDATE daily_summaries SET reflection = ? WHERE summary_date = ?")
            .bind(reflection)
            .bind(date.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_daily_summaries(&self, limit: i64) -> Result<Vec<DailySummary>> {
        let rows = sqlx::query_as::<_, DailySummary>(
            "SELECT * FROM daily_summaries ORDER BY summary_date DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------
    // Learned rules
    // -------------------------------------------------------------------

    pub async fn insert_learned_rule(&self, rule: &NewLearnedRule) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO learned_rules (rule_text, category, source_trade_ids, confidence, active)
            VALUES (?, ?, ?, 0.5, 1)
            "#,
        )
        .bind(&rule.rule_text)
        .bind(rule.category.as_str())
        .bind(&rule.source_trade_ids)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_active_rules(&self) -> Result<Vec<LearnedRule>> {
        let rules = sqlx::query_as::<_, LearnedRule>(
            "SELECT * FROM learned_rules WHERE active = 1 ORDER BY confidence DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    /// Apply one use of a rule, recording whether it was helpful, and update
    /// its confidence per spec §3 lifecycle (rises above a 0.7-helpful
    /// ratio, falls below 0.3).
    pub async fn update_rule_effectiveness(&self, id: i64, was_helpful: bool) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let (times_applied, times_helpful): (i64, i64) = sqlx::query_as(
            "SELECT times_applied, times_helpful FROM learned_rules WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let times_applied = times_applied + 1;
        let times_helpful = times_helpful + if was_helpful { 1 } else { 0 };
        let ratio = times_helpful as f64 / times_applied as f64;
        let confidence = ratio.clamp(0.0, 1.0);

        sqlx::query(
            "UPDATE learned_rules SET times_applied = ?, times_helpful = ?, confidence = ? WHERE id = ?",
        )
        .bind(times_applied)
        .bind(times_helpful)
        .bind(confidence)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Deactivate rules applied >= 10 times with < 25% helpfulness (spec §3
    /// "Pruning is scheduled weekly").
    pub async fn prune_weak_rules(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE learned_rules SET active = 0
            WHERE active = 1 AND times_applied >= 10
              AND (CAST(times_helpful AS REAL) / times_applied) < 0.25
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // -------------------------------------------------------------------
    // Config
    // -------------------------------------------------------------------

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_all_config(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM config ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<String, _>("value")))
            .collect())
    }

    // -------------------------------------------------------------------
    // Reporting
    // -------------------------------------------------------------------

    /// Aggregate performance metrics over the trailing `days` window (spec
    /// §4.1 `getPerformanceMetrics`).
    pub async fn get_performance_metrics(&self, days: i64) -> Result<PerformanceMetrics> {
        let cutoff = chrono::Local::now().date_naive() - chrono::Duration::days(days);
        let trades = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE status = 'closed' AND exit_date >= ? ORDER BY exit_date ASC",
        )
        .bind(cutoff.to_string())
        .fetch_all(&self.pool)
        .await?;

        let total_trades = trades.len() as i64;
        let wins: Vec<&Trade> = trades
            .iter()
            .filter(|t| t.pnl_dollars.unwrap_or(0.0) >= 0.0)
            .collect();
        let losses: Vec<&Trade> = trades
            .iter()
            .filter(|t| t.pnl_dollars.unwrap_or(0.0) < 0.0)
            .collect();

        let win_rate = if total_trades > 0 {
            wins.len() as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };
        let total_pnl: f64 = trades.iter().filter_map(|t| t.pnl_dollars).sum();
        let avg_win = if !wins.is_empty() {
            wins.iter().filter_map(|t| t.pnl_dollars).sum::<f64>() / wins.len() as f64
        } else {
            0.0
        };
        let avg_loss = if !losses.is_empty() {
            losses.iter().filter_map(|t| t.pnl_dollars).sum::<f64>() / losses.len() as f64
        } else {
            0.0
        };
        let gross_profit: f64 = wins.iter().filter_map(|t| t.pnl_dollars).sum();
        let gross_loss: f64 = losses.iter().filter_map(|t| t.pnl_dollars).map(|p| p.abs()).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut by_strategy: Vec<StrategyBreakdown> = Vec::new();
        for strategy in [Strategy::ShortPut, Strategy::CreditSpread, Strategy::CoveredCall] {
            let subset: Vec<&Trade> = trades
                .iter()
                .filter(|t| t.strategy == strategy.as_str())
                .collect();
            if subset.is_empty() {
                continue;
            }
            let subset_wins = subset.iter().filter(|t| t.pnl_dollars.unwrap_or(0.0) >= 0.0).count();
            by_strategy.push(StrategyBreakdown {
                strategy: strategy.as_str().to_string(),
                trades: subset.len() as i64,
                win_rate: subset_wins as f64 / subset.len() as f64 * 100.0,
                total_pnl: subset.iter().filter_map(|t| t.pnl_dollars).sum(),
            });
        }

        let mut by_ticker: Vec<TickerBreakdown> = Vec::new();
        let mut tickers: Vec<String> = trades.iter().map(|t| t.ticker.clone()).collect();
        tickers.sort();
        tickers.dedup();
        for ticker in tickers {
            let subset: Vec<&Trade> = trades.iter().filter(|t| t.ticker == ticker).collect();
            let subset_wins = subset.iter().filter(|t| t.pnl_dollars.unwrap_or(0.0) >= 0.0).count();
            by_ticker.push(TickerBreakdown {
                ticker,
                trades: subset.len() as i64,
                win_rate: subset_wins as f64 / subset.len() as f64 * 100.0,
                total_pnl: subset.iter().filter_map(|t| t.pnl_dollars).sum(),
            });
        }

        let best_trade = trades
            .iter()
            .max_by(|a, b| {
                a.pnl_dollars
                    .unwrap_or(f64::MIN)
                    .total_cmp(&b.pnl_dollars.unwrap_or(f64::MIN))
            })
            .cloned();
        let worst_trade = trades
            .iter()
            .min_by(|a, b| {
                a.pnl_dollars
                    .unwrap_or(f64::MAX)
                    .total_cmp(&b.pnl_dollars.unwrap_or(f64::MAX))
            })
            .cloned();

        let mut by_date: Vec<(NaiveDate, f64)> = Vec::new();
        for trade in &trades {
            if let (Some(date), Some(pnl)) = (trade.exit_date, trade.pnl_dollars) {
                if let Some(entry) = by_date.iter_mut().find(|(d, _)| *d == date) {
                    entry.1 += pnl;
                } else {
                    by_date.push((date, pnl));
                }
            }
        }
        by_date.sort_by_key(|(d, _)| *d);

        Ok(PerformanceMetrics {
            total_trades,
            win_rate,
            total_pnl,
            avg_win,
            avg_loss,
            profit_factor,
            by_strategy,
            by_ticker,
            best_trade,
            worst_trade,
            pnl_by_exit_date: by_date,
        })
    }

    /// Starting balance plus cumulative per-close-date P&L (spec §3
    /// "EquityCurve").
    pub async fn get_equity_curve(&self) -> Result<EquityCurve> {
        let starting_balance: f64 = self
            .get_config("paper_balance")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(100_000.0);

        let metrics = self.get_performance_metrics(3650).await?;
        let mut running = starting_balance;
        let mut points = Vec::with_capacity(metrics.pnl_by_exit_date.len());
        for (date, pnl) in &metrics.pnl_by_exit_date {
            running += pnl;
            points.push((*date, running));
        }

        Ok(EquityCurve {
            starting_balance,
            current_value: running,
            points,
        })
    }

    /// Pre-formatted multi-section text blob injected into selection and
    /// reflection prompts (spec §4.1 `buildPerformanceContext`).
    pub async fn build_performance_context(&self) -> Result<String> {
        let metrics = self.get_performance_metrics(30).await?;
        let rules = self.get_active_rules().await?;

        let mut text = String::new();
        text.push_str("=== PERFORMANCE (last 30 days) ===\n");
        text.push_str(&format!(
            "Total trades: {} | Win rate: {:.1}% | Total P&L: ${:.2} | Profit factor: {:.2}\n",
            metrics.total_trades, metrics.win_rate, metrics.total_pnl, metrics.profit_factor
        ));
        text.push_str(&format!(
            "Avg win: ${:.2} | Avg loss: ${:.2}\n",
            metrics.avg_win, metrics.avg_loss
        ));

        if !metrics.by_strategy.is_empty() {
            text.push_str("\n=== BY STRATEGY ===\n");
            for s in &metrics.by_strategy {
                text.push_str(&format!(
                    "{}: {} trades, {:.1}% win rate, ${:.2} total\n",
                    s.strategy, s.trades, s.win_rate, s.total_pnl
                ));
            }
        }

        if !rules.is_empty() {
            text.push_str("\n=== LEARNED RULES ===\n");
            for r in &rules {
                text.push_str(&format!(
                    "[{}] {} (confidence {:.2}, applied {}x)\n",
                    r.category, r.rule_text, r.confidence, r.times_applied
                ));
            }
        }

        Ok(text)
    }
}

/// Caller-supplied fields for `upsert_market_scan`, kept distinct from the
/// full `MarketScan` row type because `id` and the raw JSON blobs are
/// derived, not supplied directly.
#[derive(Debug, Clone)]
pub struct NewMarketScan {
    pub scan_date: NaiveDate,
    pub market_mood: crate::types::MarketMood,
    pub trending_tickers: String,
    pub sector_momentum: String,
    pub caution_flags: String,
    pub raw_text: String,
    pub vix: Option<f64>,
    pub spy_price: Option<f64>,
    pub candidate_pool: Option<String>,
    pub selected_picks: Option<String>,
    pub sentiment_model: Option<String>,
    pub analysis_model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTradeReview {
    pub trade_id: i64,
    pub raw_text: String,
    pub lesson: Option<String>,
    pub what_worked: Option<String>,
    pub what_failed: Option<String>,
    pub should_repeat: Option<bool>,
    pub model_used: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLearnedRule {
    pub rule_text: String,
    pub category: crate::types::RuleCategory,
    pub source_trade_ids: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_draft(ticker: &str, sector: &str) -> TradeDraft {
        TradeDraft {
            ticker: ticker.to_string(),
            strategy: Strategy::CreditSpread,
            direction: "short",
            sector: sector.to_string(),
            strike: 180.0,
            strike_sell: Some(180.0),
            strike_buy: Some(175.0),
            spread_width: Some(5.0),
            expiry: NaiveDate::from_ymd_opt(2026, 4, 17).unwrap(),
            dte: 35,
            contracts: 1,
            entry_price: 1.20,
            entry_date: NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
            entry_spot: 181.0,
            entry_iv: Some(0.28),
            entry_delta: Some(-0.2),
            max_profit: 120.0,
            max_loss: 380.0,
            market_scan_id: None,
            ai_rationale: Some("bullish momentum".to_string()),
            ai_confidence: Some(78.0),
            model_used: Some("deepseek-r1:70b".to_string()),
            stop_loss_price: 2.40,
            profit_target_price: 0.60,
        }
    }

    #[tokio::test]
    async fn insert_and_close_trade_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .insert_trade(sample_draft("AAA", "Technology"), 2, &[Strategy::CreditSpread])
            .await
            .unwrap();

        let open = store.get_open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);

        store
            .close_trade(
                id,
                ExitData {
                    exit_price: 0.6,
                    exit_date: NaiveDate::from_ymd_opt(2026, 3, 20).unwrap(),
                    exit_spot: 190.0,
                    exit_reason: ExitReason::ProfitTarget,
                    pnl_dollars: 60.0,
                    pnl_percent: 50.0,
                },
            )
            .await
            .unwrap();

        let open = store.get_open_trades().await.unwrap();
        assert!(open.is_empty());
        let trade = store.get_trade(id).await.unwrap().unwrap();
        assert_eq!(trade.status, "closed");
        assert_eq!(trade.exit_reason.as_deref(), Some("profit_target"));
    }

    #[tokio::test]
    async fn duplicate_ticker_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_trade(sample_draft("AAA", "Technology"), 2, &[Strategy::CreditSpread])
            .await
            .unwrap();

        let err = store
            .insert_trade(sample_draft("AAA", "Finance"), 2, &[Strategy::CreditSpread])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[tokio::test]
    async fn sector_cap_enforced() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_trade(sample_draft("AAA", "Technology"), 1, &[Strategy::CreditSpread])
            .await
            .unwrap();

        let err = store
            .insert_trade(sample_draft("BBB", "Technology"), 1, &[Strategy::CreditSpread])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sector cap"));
    }

    #[tokio::test]
    async fn disallowed_strategy_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store
            .insert_trade(sample_draft("AAA", "Technology"), 2, &[Strategy::ShortPut])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("allowed_strategies"));
    }

    #[tokio::test]
    async fn config_defaults_are_seeded() {
        let store = Store::open_in_memory().await.unwrap();
        let value = store.get_config("max_positions").await.unwrap();
        assert_eq!(value.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn config_set_overrides_default() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_config("max_positions", "8").await.unwrap();
        let value = store.get_config("max_positions").await.unwrap();
        assert_eq!(value.as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn market_scan_upsert_is_idempotent_per_date() {
        let store = Store::open_in_memory().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let scan = NewMarketScan {
            scan_date: date,
            market_mood: crate::types::MarketMood::Neutral,
            trending_tickers: "AAA,BBB".to_string(),
            sector_momentum: "{}".to_string(),
            caution_flags: String::new(),
            raw_text: "raw".to_string(),
            vix: Some(15.0),
            spy_price: Some(500.0),
            candidate_pool: None,
            selected_picks: None,
            sentiment_model: Some("grok-4".to_string()),
            analysis_model: None,
        };
        store.upsert_market_scan(&scan).await.unwrap();
        store.upsert_market_scan(&scan).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM market_scans")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn trades_opened_and_closed_on_filter_by_date() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .insert_trade(sample_draft("AAA", "Technology"), 2, &[Strategy::CreditSpread])
            .await
            .unwrap();
        let entry_date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let exit_date = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();

        let opened = store.get_trades_opened_on(entry_date).await.unwrap();
        assert_eq!(opened.len(), 1);
        assert!(store.get_trades_closed_on(exit_date).await.unwrap().is_empty());

        store
            .close_trade(
                id,
                ExitData {
                    exit_price: 0.6,
                    exit_date,
                    exit_spot: 190.0,
                    exit_reason: ExitReason::ProfitTarget,
                    pnl_dollars: 60.0,
                    pnl_percent: 50.0,
                },
            )
            .await
            .unwrap();

        let closed = store.get_trades_closed_on(exit_date).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, id);
    }

    #[tokio::test]
    async fn learned_rule_prunes_after_weak_track_record() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .insert_learned_rule(&NewLearnedRule {
                rule_text: "avoid earnings week".to_string(),
                category: crate::types::RuleCategory::Timing,
                source_trade_ids: "1".to_string(),
            })
            .await
            .unwrap();

        for i in 0..10 {
            store.update_rule_effectiveness(id, i < 2).await.unwrap();
        }

        let pruned = store.prune_weak_rules().await.unwrap();
        assert_eq!(pruned, 1);
        let active = store.get_active_rules().await.unwrap();
        assert!(active.is_empty());
    }
}
