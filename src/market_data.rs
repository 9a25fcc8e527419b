// =============================================================================
// Market Data Gateway (C3) — outbound quote and option-chain lookups
// =============================================================================
//
// No brokerage credentials here: this is paper trading, so there is nothing
// to sign. A thin reqwest wrapper — a shared client, a base URL, one method
// per endpoint — with bounded concurrent fan-out for the batch lookups
// Phase 2 needs.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::TraderError;

/// Maximum number of in-flight requests for a batch lookup (spec §4.2
/// "Phase 2 ... concurrent batches of 5").
const BATCH_CONCURRENCY: usize = 5;

/// Last/bid/ask/volume/change snapshot for a single underlying (spec §6.2
/// "Quote service").
#[derive(Debug, Clone, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: f64,
    pub net_change: f64,
    pub percent_change: f64,
    pub week52_low: f64,
    pub week52_high: f64,
    /// Provider identifier for the quote (spec §4.3 `source`), e.g. the
    /// upstream feed name. Defaults to empty when the provider omits it.
    #[serde(default)]
    pub source: String,
}

impl Quote {
    /// Where `last` sits within the 52-week range, 0.0 at the low and 1.0 at
    /// the high (spec §4.3 `rangePosition`). `None` when the range is
    /// degenerate (high <= low).
    pub fn range_position(&self) -> Option<f64> {
        let span = self.week52_high - self.week52_low;
        if span <= 0.0 {
            return None;
        }
        Some(((self.last - self.week52_low) / span).clamp(0.0, 1.0))
    }
}

/// Option premium snapshot for a (ticker, expiry, right, strike) tuple (spec
/// §6.2 "Option chain/premium").
#[derive(Debug, Clone, Deserialize)]
pub struct OptionPremium {
    pub mid: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    #[serde(default)]
    pub iv: Option<f64>,
    #[serde(default)]
    pub delta: Option<f64>,
}

/// An option contract's put/call identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }
}

/// Thin reqwest-backed client over the configured quote provider.
#[derive(Clone)]
pub struct MarketDataGateway {
    base_url: String,
    client: reqwest::Client,
}

impl MarketDataGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// GET quote for a single symbol (spec §6.2). A single failed call
    /// becomes a `RecoverableData` error for the caller to skip.
    #[instrument(skip(self), name = "market_data::get_quote")]
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, TraderError> {
        let url = format!("{}/quote/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TraderError::RecoverableData(format!("quote fetch for {symbol}: {e}")))?;

        if !resp.status().is_success() {
            return Err(TraderError::RecoverableData(format!(
                "quote fetch for {symbol} returned {}",
                resp.status()
            )));
        }

        resp.json::<Quote>()
            .await
            .map_err(|e| TraderError::RecoverableData(format!("quote parse for {symbol}: {e}")))
    }

    /// GET option premium for a single contract (spec §6.2).
    #[instrument(skip(self), name = "market_data::get_option_premium")]
    pub async fn get_option_premium(
        &self,
        ticker: &str,
        expiry: &str,
        right: OptionRight,
        strike: f64,
    ) -> Result<OptionPremium, TraderError> {
        let url = format!(
            "{}/options/{}/{}/{}/{}",
            self.base_url,
            ticker,
            expiry,
            right.as_str(),
            strike
        );
        let resp = self.client.get(&url).send().await.map_err(|e| {
            TraderError::RecoverableData(format!("option premium fetch for {ticker}: {e}"))
        })?;

        if !resp.status().is_success() {
            return Err(TraderError::RecoverableData(format!(
                "option premium fetch for {ticker} returned {}",
                resp.status()
            )));
        }

        resp.json::<OptionPremium>()
            .await
            .map_err(|e| TraderError::RecoverableData(format!("option premium parse for {ticker}: {e}")))
    }

    /// GET the provider's trending ticker list (spec §6.2). Falls back to an
    /// empty list on failure rather than aborting the caller's phase.
    #[instrument(skip(self), name = "market_data::get_trending_tickers")]
    pub async fn get_trending_tickers(&self) -> Vec<String> {
        let url = format!("{}/trending", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => match resp.json::<Vec<String>>().await {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, "failed to parse trending tickers response");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to fetch trending tickers");
                Vec::new()
            }
        }
    }

    /// GET the provider's most-active ticker list (spec §6.2), same
    /// degrade-to-empty behavior as `get_trending_tickers`.
    #[instrument(skip(self), name = "market_data::get_most_active_tickers")]
    pub async fn get_most_active_tickers(&self) -> Vec<String> {
        let url = format!("{}/most-active", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => match resp.json::<Vec<String>>().await {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, "failed to parse most-active tickers response");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to fetch most-active tickers");
                Vec::new()
            }
        }
    }

    /// Fetch quotes for every candidate with at most `BATCH_CONCURRENCY`
    /// requests in flight at a time, tolerating individual failures (spec
    /// §4.2 "Fetch price and range data for each candidate in concurrent
    /// batches of 5; drop those with no price").
    pub async fn get_quotes_batch(&self, symbols: &[String]) -> Vec<Quote> {
        let results: Vec<Option<Quote>> = stream::iter(symbols.iter().cloned())
            .map(|symbol| {
                let gateway = self.clone();
                async move {
                    match gateway.get_quote(&symbol).await {
                        Ok(quote) => Some(quote),
                        Err(e) => {
                            debug!(symbol, error = %e, "dropping candidate with no price");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(last: f64, low: f64, high: f64) -> Quote {
        Quote {
            symbol: "AAPL".to_string(),
            last,
            bid: None,
            ask: None,
            volume: 0.0,
            net_change: 0.0,
            percent_change: 0.0,
            week52_low: low,
            week52_high: high,
            source: String::new(),
        }
    }

    #[test]
    fn range_position_midpoint() {
        assert_eq!(quote(150.0, 100.0, 200.0).range_position(), Some(0.5));
    }

    #[test]
    fn range_position_clamps_outside_range() {
        assert_eq!(quote(250.0, 100.0, 200.0).range_position(), Some(1.0));
        assert_eq!(quote(50.0, 100.0, 200.0).range_position(), Some(0.0));
    }

    #[test]
    fn range_position_none_on_degenerate_range() {
        assert_eq!(quote(150.0, 100.0, 100.0).range_position(), None);
    }
}
