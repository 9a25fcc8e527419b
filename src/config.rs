// =============================================================================
// Config — typed coercion helpers over the Store's string-keyed config table
// =============================================================================
//
// The Store persists config as `(key, value)` string pairs; this module is
// the caller-side typed layer, giving each phase a read-only snapshot taken
// once per invocation rather than live lookups scattered through the call
// chain.
// =============================================================================

use anyhow::{Context, Result};

use crate::store::Store;
use crate::types::Strategy;

/// A read-only snapshot of every tunable named in spec §6.1, taken once at
/// the start of a phase or monitor tick.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub enabled: bool,
    pub paper_balance: f64,
    pub max_positions: i64,
    pub max_daily_risk_pct: f64,
    pub max_margin_pct: f64,
    pub max_per_sector: i64,
    pub stop_loss_multiplier: f64,
    pub profit_target_pct: f64,
    pub min_dte: i64,
    pub max_dte: i64,
    pub manage_dte: i64,
    pub allowed_strategies: Vec<Strategy>,
    pub min_spread_width: f64,
    pub monitor_interval_sec: u64,
    pub morning_scan_time: String,
    pub analysis_time: String,
    pub execution_time: String,
    pub eod_review_time: String,
    pub reflection_time: String,
    pub deepseek_model: String,
    pub grok_model: String,
}

async fn get_or_default(store: &Store, key: &str) -> Result<String> {
    store
        .get_config(key)
        .await?
        .with_context(|| format!("config key {key} missing — store not initialized"))
}

fn parse_f64(value: &str, key: &str) -> Result<f64> {
    value.trim().parse().with_context(|| format!("config key {key} is not a number: {value}"))
}

fn parse_i64(value: &str, key: &str) -> Result<i64> {
    value.trim().parse().with_context(|| format!("config key {key} is not an integer: {value}"))
}

fn parse_strategy_list(value: &str) -> Vec<Strategy> {
    serde_json::from_str::<Vec<String>>(value)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| Strategy::parse(s))
        .collect()
}

impl ConfigSnapshot {
    /// Load a fresh snapshot from the Store. Every key seeded by
    /// `Store::open` is expected to be present; a missing key is treated as
    /// a Fatal-grade misconfiguration rather than silently substituted,
    /// since it means the store was never properly initialized.
    pub async fn load(store: &Store) -> Result<Self> {
        let enabled = get_or_default(store, "enabled").await? == "true";
        let paper_balance = parse_f64(&get_or_default(store, "paper_balance").await?, "paper_balance")?;
        let max_positions = parse_i64(&get_or_default(store, "max_positions").await?, "max_positions")?;
        let max_daily_risk_pct = parse_f64(
            &get_or_default(store, "max_daily_risk_pct").await?,
            "max_daily_risk_pct",
        )?;
        let max_margin_pct = parse_f64(&get_or_default(store, "max_margin_pct").await?, "max_margin_pct")?;
        let max_per_sector = parse_i64(&get_or_default(store, "max_per_sector").await?, "max_per_sector")?;
        let stop_loss_multiplier = parse_f64(
            &get_or_default(store, "stop_loss_multiplier").await?,
            "stop_loss_multiplier",
        )?;
        let profit_target_pct = parse_f64(
            &get_or_default(store, "profit_target_pct").await?,
            "profit_target_pct",
        )?;
        let min_dte = parse_i64(&get_or_default(store, "min_dte").await?, "min_dte")?;
        let max_dte = parse_i64(&get_or_default(store, "max_dte").await?, "max_dte")?;
        let manage_dte = parse_i64(&get_or_default(store, "manage_dte").await?, "manage_dte")?;
        let allowed_strategies = parse_strategy_list(&get_or_default(store, "allowed_strategies").await?);
        let min_spread_width = parse_f64(
            &get_or_default(store, "min_spread_width").await?,
            "min_spread_width",
        )?;
        let monitor_interval_sec = parse_i64(
            &get_or_default(store, "monitor_interval_sec").await?,
            "monitor_interval_sec",
        )?
        .max(1) as u64;

        Ok(Self {
            enabled,
            paper_balance,
            max_positions,
            max_daily_risk_pct,
            max_margin_pct,
            max_per_sector,
            stop_loss_multiplier,
            profit_target_pct,
            min_dte,
            max_dte,
            manage_dte,
            allowed_strategies,
            min_spread_width,
            monitor_interval_sec,
            morning_scan_time: get_or_default(store, "morning_scan_time").await?,
            analysis_time: get_or_default(store, "analysis_time").await?,
            execution_time: get_or_default(store, "execution_time").await?,
            eod_review_time: get_or_default(store, "eod_review_time").await?,
            reflection_time: get_or_default(store, "reflection_time").await?,
            deepseek_model: get_or_default(store, "deepseek_model").await?,
            grok_model: get_or_default(store, "grok_model").await?,
        })
    }

    pub fn daily_risk_budget(&self) -> f64 {
        self.paper_balance * self.max_daily_risk_pct / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_reads_seeded_defaults() {
        let store = Store::open_in_memory().await.unwrap();
        let snapshot = ConfigSnapshot::load(&store).await.unwrap();
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.paper_balance, 100_000.0);
        assert_eq!(snapshot.max_positions, 5);
        assert_eq!(snapshot.allowed_strategies.len(), 3);
        assert_eq!(snapshot.daily_risk_budget(), 20_000.0);
    }

    #[tokio::test]
    async fn load_reflects_overridden_values() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_config("max_positions", "8").await.unwrap();
        store
            .set_config("allowed_strategies", "[\"short_put\"]")
            .await
            .unwrap();
        let snapshot = ConfigSnapshot::load(&store).await.unwrap();
        assert_eq!(snapshot.max_positions, 8);
        assert_eq!(snapshot.allowed_strategies, vec![Strategy::ShortPut]);
    }
}
