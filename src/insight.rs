// Daily-insight greeting for the dashboard header, generated through the
// Gemini REST API. The provider sits behind a trait so the dashboard can
// be tested with stubs, and every failure path degrades to a static
// fallback instead of surfacing an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Greeting shown in the dashboard header, with an optional one-line
/// insight underneath.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub greeting: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<String>,
}

/// The deterministic stand-in used whenever generation is unavailable.
/// No insight line is shown in this case.
pub fn fallback_insight(display_name: &str) -> Insight {
    Insight {
        greeting: format!("Hello, {display_name}! Welcome back."),
        insight: None,
    }
}

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    BadResponse(String),
}

#[async_trait]
pub trait InsightProvider: Send + Sync {
    async fn generate(&self, display_name: &str) -> Result<Insight, InsightError>;
}

/// Fetch an insight from `provider`, substituting the fallback when no
/// provider is configured or the call fails. Never errors, so a dead
/// provider cannot take the dashboard down with it.
pub async fn insight_or_fallback(
    provider: Option<&dyn InsightProvider>,
    display_name: &str,
) -> Insight {
    let Some(provider) = provider else {
        return fallback_insight(display_name);
    };
    match provider.generate(display_name).await {
        Ok(insight) => insight,
        Err(e) => {
            tracing::warn!("Insight generation failed: {e}");
            fallback_insight(display_name)
        }
    }
}

// ── Gemini provider ──────────────────────────────────────────────────

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Result<Self, InsightError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_key,
            model,
        })
    }
}

/// The JSON object the model is asked to produce.
#[derive(Deserialize)]
struct GeneratedInsight {
    greeting: String,
    insight: String,
}

#[async_trait]
impl InsightProvider for GeminiProvider {
    async fn generate(&self, display_name: &str) -> Result<Insight, InsightError> {
        let url = format!(
            "{GEMINI_ENDPOINT}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let prompt = format!(
            "The user {display_name} just signed in to the Nexus dashboard. \
             Respond with JSON containing \"greeting\" (a short welcome message, \
             at most 20 words) and \"insight\" (one motivational or technical \
             insight of the day for a professional dashboard)."
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let payload: serde_json::Value = response.json().await?;

        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| InsightError::BadResponse("no candidate text".to_string()))?;

        let generated: GeneratedInsight = serde_json::from_str(text)
            .map_err(|e| InsightError::BadResponse(format!("candidate is not insight JSON: {e}")))?;

        Ok(Insight {
            greeting: generated.greeting,
            insight: Some(generated.insight),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    #[async_trait]
    impl InsightProvider for FailingProvider {
        async fn generate(&self, _display_name: &str) -> Result<Insight, InsightError> {
            Err(InsightError::BadResponse("boom".to_string()))
        }
    }

    struct CannedProvider;

    #[async_trait]
    impl InsightProvider for CannedProvider {
        async fn generate(&self, display_name: &str) -> Result<Insight, InsightError> {
            Ok(Insight {
                greeting: format!("Greetings, {display_name}."),
                insight: Some("Ship small, ship often.".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn test_provider_failure_yields_fallback() {
        let insight = insight_or_fallback(Some(&FailingProvider), "Alice").await;
        assert_eq!(insight, fallback_insight("Alice"));
        assert_eq!(insight.greeting, "Hello, Alice! Welcome back.");
        assert!(insight.insight.is_none());
    }

    #[tokio::test]
    async fn test_missing_provider_yields_fallback() {
        let insight = insight_or_fallback(None, "Bob").await;
        assert_eq!(insight, fallback_insight("Bob"));
    }

    #[tokio::test]
    async fn test_working_provider_passes_through() {
        let insight = insight_or_fallback(Some(&CannedProvider), "Carol").await;
        assert_eq!(insight.greeting, "Greetings, Carol.");
        assert_eq!(insight.insight.as_deref(), Some("Ship small, ship often."));
    }
}
