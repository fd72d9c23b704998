//! Troubleshooting assistant
//!
//! Turns a failed delivery into a prompt for an external text-generation
//! service (Gemini `generateContent`) and returns the Markdown answer. The
//! assistant never fails the caller: missing configuration, transport errors
//! and empty answers all come back as fixed messages.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;

use crate::config::AssistantConfig;
use crate::event::{DeliveryOutcome, LifecycleEvent};

pub const DISABLED_MESSAGE: &str =
    "AI troubleshooting is disabled. Configure GEMINI_API_KEY to enable it.";
pub const EMPTY_ANSWER_MESSAGE: &str = "The AI assistant did not return an answer.";

/// Prompt describing one failed activation
pub fn build_prompt(outcome: &DeliveryOutcome, event: &LifecycleEvent) -> String {
    let attempted_at = outcome
        .attempted_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| outcome.attempted_at.to_string());

    format!(
        r#"You are a support engineer for a SaaS automation platform.
The owner of a micro-SaaS hit a failure while activating a plan. Give clear, actionable troubleshooting steps.

**Problem details:**
- **Checkout platform:** {platform}
- **Customer email:** {email}
- **SaaS plan:** {plan}
- **Event:** {event}
- **Date/time:** {attempted_at}
- **Error message:** "{error}"

**Instructions:**
1. Analyze the error message and the context.
2. Give a short, easy to understand explanation of the likely cause.
3. Offer 3 to 5 concrete, step-by-step fixes the SaaS owner should follow.
4. Format the answer as clean Markdown with headings, bold text and lists.
5. Keep a helpful, encouraging tone."#,
        platform = event.platform.label(),
        email = event.customer_email,
        plan = event.plan.display_name(),
        event = event.event_type.wire_name(),
        attempted_at = attempted_at,
        error = outcome.http_status_or_error,
    )
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[derive(Clone)]
pub struct TroubleshootAssistant {
    client: Client,
    config: AssistantConfig,
}

impl TroubleshootAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    pub async fn explain(&self, outcome: &DeliveryOutcome, event: &LifecycleEvent) -> String {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return DISABLED_MESSAGE.to_string();
        };

        match self.generate(api_key, &build_prompt(outcome, event)).await {
            Ok(Some(text)) => text,
            Ok(None) => EMPTY_ANSWER_MESSAGE.to_string(),
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    error = %e,
                    "Troubleshooting assistant call failed"
                );
                format!(
                    "Could not reach the AI assistant. Check the logs for details. Error: {}",
                    e
                )
            }
        }
    }

    async fn generate(&self, api_key: &str, prompt: &str) -> Result<Option<String>, reqwest::Error> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let response: GenerateResponse = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&json!({ "contents": [{ "parts": [{ "text": prompt }] }] }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.text())
    }
}
