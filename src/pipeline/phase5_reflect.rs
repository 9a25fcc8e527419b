// =============================================================================
// Phase 5 — Self-reflection
// =============================================================================
//
// Turns today's closed trades into reviews and, where a lesson generalizes,
// a LearnedRule that future Phase 2 prompts will see via
// `Store::build_performance_context` (spec §4.7 "Phase 5 — Self-reflection").
// =============================================================================

use chrono::Datelike;
use tracing::warn;

use crate::events::ProgressStatus;
use crate::parsers::parse_review;
use crate::prompts::{build_reflection_prompt, build_review_prompt};
use crate::store::{NewLearnedRule, NewTradeReview};
use crate::types::{PhaseOutcome, RuleCategory};

use super::PipelineContext;

pub async fn run_phase5(ctx: &PipelineContext) -> anyhow::Result<PhaseOutcome> {
    ctx.events.progress(5, ProgressStatus::Starting, "reflect: starting");

    let config = crate::config::ConfigSnapshot::load(&ctx.store).await?;
    let today = ctx.clock.now().date_naive();
    let closed_today = ctx.store.get_trades_closed_on(today).await?;

    let mut reviewed = 0;
    let mut rules_added = 0;

    for trade in &closed_today {
        if !ctx.store.get_trade_reviews(trade.id).await?.is_empty() {
            continue;
        }

        let prompt = build_review_prompt(
            &trade.ticker,
            &trade.strategy,
            trade.entry_price,
            trade.exit_price.unwrap_or(0.0),
            trade.entry_spot,
            trade.exit_spot.unwrap_or(trade.entry_spot),
            trade.exit_reason.as_deref().unwrap_or("unknown"),
            trade.pnl_dollars.unwrap_or(0.0),
            trade.pnl_percent.unwrap_or(0.0),
            trade.ai_rationale.as_deref(),
        );

        let raw = match ctx.ai.call(&prompt, &config.deepseek_model, 600).await {
            Ok(text) => text,
            Err(e) => {
                warn!(trade_id = trade.id, error = %e, "reflect: review call failed, skipping trade");
                continue;
            }
        };
        let parsed = parse_review(&raw);

        let review_id = ctx
            .store
            .insert_trade_review(&NewTradeReview {
                trade_id: trade.id,
                raw_text: parsed.full_review.clone().unwrap_or(raw),
                lesson: parsed.lesson.clone(),
                what_worked: parsed.what_worked.clone(),
                what_failed: parsed.what_failed.clone(),
                should_repeat: parsed.should_repeat,
                model_used: Some(config.deepseek_model.clone()),
            })
            .await?;

        if review_id.is_some() {
            reviewed += 1;
        }

        if let Some(rule_text) = parsed.new_rule {
            let category = parsed
                .rule_category
                .as_deref()
                .and_then(RuleCategory::parse)
                .unwrap_or(RuleCategory::General);
            ctx.store
                .insert_learned_rule(&NewLearnedRule {
                    rule_text,
                    category,
                    source_trade_ids: trade.id.to_string(),
                })
                .await?;
            rules_added += 1;
        }
    }

    if ctx.clock.now().weekday() == chrono::Weekday::Fri {
        let pruned = ctx.store.prune_weak_rules().await?;
        if pruned > 0 {
            ctx.events.log(
                format!("reflect: pruned {pruned} weak rule(s)"),
                ctx.clock.now(),
            );
        }
    }

    let metrics = ctx.store.get_performance_metrics(30).await?;
    let active_rules = ctx.store.get_active_rules().await?;
    let reflection_prompt = build_reflection_prompt(&metrics, active_rules.len());
    match ctx.ai.call(&reflection_prompt, &config.deepseek_model, 400).await {
        Ok(reflection) => {
            ctx.store.set_daily_reflection(today, reflection.trim()).await?;
        }
        Err(e) => {
            warn!(error = %e, "reflect: daily reflection call failed");
        }
    }

    ctx.events.progress(
        5,
        ProgressStatus::Complete,
        format!("reflect: {reviewed} review(s) written, {rules_added} rule(s) learned"),
    );
    Ok(PhaseOutcome::Complete)
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
    use crate::store::{ExitData, Store, TradeDraft};
    use crate::types::{ExitReason, Strategy};

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

    fn sample_draft() -> TradeDraft {
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
            dte: 15,
            contracts: 1,
            entry_price: 1.5,
            entry_date: NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
            entry_spot: 101.0,
            entry_iv: None,
            entry_delta: None,
            max_profit: 150.0,
            max_loss: 8500.0,
            market_scan_id: None,
            ai_rationale: Some("oversold bounce".to_string()),
            ai_confidence: Some(0.7),
            model_used: None,
            stop_loss_price: 4.5,
            profit_target_price: 0.75,
        }
    }

    #[tokio::test]
    async fn reflect_is_a_no_op_with_nothing_closed_today_and_unreachable_model() {
        let ctx = sample_context("2026-03-05 16:30:00").await;
        let outcome = run_phase5(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Complete);

        let summaries = ctx.store.get_daily_summaries(1).await.unwrap();
        assert!(summaries.is_empty(), "phase 5 must not create a summary row on its own");
    }

    #[tokio::test]
    async fn skips_trades_that_already_have_a_review() {
        let ctx = sample_context("2026-03-06 16:30:00").await;
        let id = ctx
            .store
            .insert_trade(sample_draft(), 2, &[Strategy::ShortPut])
            .await
            .unwrap();
        let exit_date = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();
        ctx.store
            .close_trade(
                id,
                ExitData {
                    exit_price: 0.6,
                    exit_date,
                    exit_spot: 95.0,
                    exit_reason: ExitReason::ProfitTarget,
                    pnl_dollars: 90.0,
                    pnl_percent: 60.0,
                },
            )
            .await
            .unwrap();
        ctx.store
            .insert_trade_review(&NewTradeReview {
                trade_id: id,
                raw_text: "already reviewed".to_string(),
                lesson: None,
                what_worked: None,
                what_failed: None,
                should_repeat: Some(true),
                model_used: None,
            })
            .await
            .unwrap();

        run_phase5(&ctx).await.unwrap();

        let reviews = ctx.store.get_trade_reviews(id).await.unwrap();
        assert_eq!(reviews.len(), 1, "a second review must not be appended");
    }

    #[tokio::test]
    async fn friday_run_prunes_weak_rules() {
        // 2026-03-06 is a Friday.
        let ctx = sample_context("2026-03-06 16:30:00").await;
        let rule_id = ctx
            .store
            .insert_learned_rule(&NewLearnedRule {
                rule_text: "avoid earnings week entries".to_string(),
                category: RuleCategory::Entry,
                source_trade_ids: "1".to_string(),
            })
            .await
            .unwrap();
        for _ in 0..10 {
            ctx.store.update_rule_effectiveness(rule_id, false).await.unwrap();
        }

        run_phase5(&ctx).await.unwrap();

        let active = ctx.store.get_active_rules().await.unwrap();
        assert!(active.is_empty(), "weak rule should have been pruned on a Friday");
    }
}
