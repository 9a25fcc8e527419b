// =============================================================================
// AI Gateway (C4) — outbound calls to the analysis and search models
// =============================================================================
//
// Same reqwest-client-with-timeout shape as the Market Data Gateway and the
// teacher's `BinanceClient`, reduced to the two calls Prompts/Parsers need:
// a plain completion call and a search-augmented call that also returns
// citations. Neither call is retried — spec §6.2 gives each a configured
// timeout ceiling and leaves retry policy to the caller (none of the phases
// retry; a failed call becomes `Degraded` or `AbortPhase`).
// =============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::TraderError;

/// A citation returned alongside a search-augmented completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

/// Result of a search-augmented call (spec §6.2 "Search LLM").
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Extra knobs for a search-augmented call.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub max_tokens: Option<u32>,
    pub recency_days: Option<u32>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: Option<u32>,
    recency_days: Option<u32>,
}

#[derive(Deserialize)]
struct SearchResponse {
    text: String,
    #[serde(default)]
    citations: Vec<Citation>,
}

/// Thin client over the configured analysis/search model endpoints.
#[derive(Clone)]
pub struct AiGateway {
    base_url: String,
    client: reqwest::Client,
}

impl AiGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Plain completion call (spec §6.2 "Analysis LLM"). Used for market
    /// scans, pick selection, reviews, and reflections.
    #[instrument(skip(self, prompt), name = "ai_gateway::call")]
    pub async fn call(&self, prompt: &str, model: &str, max_tokens: u32) -> Result<String, TraderError> {
        let url = format!("{}/complete", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&CompletionRequest {
                model,
                prompt,
                max_tokens,
            })
            .send()
            .await
            .map_err(|e| TraderError::RecoverableData(format!("ai call to {model} failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(TraderError::RecoverableData(format!(
                "ai call to {model} returned {}",
                resp.status()
            )));
        }

        let body: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| TraderError::RecoverableData(format!("ai response parse for {model}: {e}")))?;
        Ok(body.text)
    }

    /// Search-augmented completion call (spec §6.2 "Search LLM"). Used for
    /// the morning sentiment scan, where citations back the narrative.
    #[instrument(skip(self, prompt), name = "ai_gateway::call_with_search")]
    pub async fn call_with_search(
        &self,
        prompt: &str,
        model: &str,
        options: SearchOptions,
    ) -> Result<SearchResult, TraderError> {
        let url = format!("{}/search", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&SearchRequest {
                model,
                prompt,
                max_tokens: options.max_tokens,
                recency_days: options.recency_days,
            })
            .send()
            .await
            .map_err(|e| TraderError::RecoverableData(format!("ai search call to {model} failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(TraderError::RecoverableData(format!(
                "ai search call to {model} returned {}",
                resp.status()
            )));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| TraderError::RecoverableData(format!("ai search response parse for {model}: {e}")))?;
        Ok(SearchResult {
            text: body.text,
            citations: body.citations,
        })
    }
}
