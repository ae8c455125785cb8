//! OpenRouterProvider -- concrete [`ChatProvider`] implementation for the
//! OpenRouter chat completions API.
//!
//! Sends requests to `/chat/completions` and retrieves per-generation cost
//! from `/generation` after a short settling delay (the provider finalizes
//! metering asynchronously). Cost retrieval failures are logged and reported
//! as 0.0 so they never fail a step.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

use mailloom_core::llm::provider::ChatProvider;
use mailloom_types::llm::{ChatOutcome, ChatRequest, LlmError, TokenUsage, ToolChoice};
use mailloom_types::message::ChatMessage;

/// OpenRouter chat provider.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    /// Settling delay before the cost endpoint is queried.
    cost_delay: Duration,
}

#[derive(Serialize)]
struct WirePayload<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

impl OpenRouterProvider {
    /// Create a new provider with the production base URL.
    pub fn new(api_key: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            cost_delay: Duration::from_secs(2),
        }
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Override the cost settling delay.
    pub fn with_cost_delay(mut self, cost_delay: Duration) -> Self {
        self.cost_delay = cost_delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn payload<'a>(request: &'a ChatRequest) -> WirePayload<'a> {
        let tools = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        },
                    })
                })
                .collect()
        });

        let tool_choice = request.tool_choice.map(|choice| match choice {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
        });

        let response_format = request
            .response_format_json
            .then(|| serde_json::json!({"type": "json_object"}));

        WirePayload {
            model: &request.model,
            messages: &request.messages,
            tools,
            tool_choice,
            response_format,
        }
    }

    /// Parse a chat completions response body into a [`ChatOutcome`].
    fn parse_outcome(raw: Value) -> Result<ChatOutcome, LlmError> {
        let generation_id = raw
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let message_value = raw
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .cloned()
            .ok_or_else(|| LlmError::Deserialization("response has no choices".to_string()))?;
        let message: ChatMessage = serde_json::from_value(message_value)
            .map_err(|e| LlmError::Deserialization(format!("invalid message: {e}")))?;

        let usage = raw
            .get("usage")
            .and_then(|usage| serde_json::from_value::<TokenUsage>(usage.clone()).ok());

        Ok(ChatOutcome {
            generation_id,
            message,
            usage,
            raw,
        })
    }
}

// OpenRouterProvider intentionally does NOT derive Debug so the API key
// can never end up in logs.

impl ChatProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, LlmError> {
        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&Self::payload(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Provider(format!("HTTP request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = body.as_str(), "OpenRouter chat call failed");
            return Err(match status.as_u16() {
                401 => LlmError::AuthenticationFailed,
                429 => LlmError::RateLimited,
                _ => LlmError::Provider(format!("HTTP {status}: {body}")),
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;
        Self::parse_outcome(raw)
    }

    async fn generation_cost(&self, generation_id: &str) -> Result<f64, LlmError> {
        tokio::time::sleep(self.cost_delay).await;

        let result = self
            .client
            .get(self.url("/generation"))
            .query(&[("id", generation_id)])
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(generation_id, %error, "cost retrieval request failed");
                return Ok(0.0);
            }
        };

        if !response.status().is_success() {
            tracing::error!(
                generation_id,
                status = %response.status(),
                "cost retrieval returned an error status"
            );
            return Ok(0.0);
        }

        match response.json::<Value>().await {
            Ok(body) => Ok(body
                .get("data")
                .and_then(|data| data.get("total_cost"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)),
            Err(error) => {
                tracing::error!(generation_id, %error, "cost retrieval body was unreadable");
                Ok(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailloom_types::llm::ToolSpec;
    use serde_json::json;

    #[test]
    fn payload_includes_tools_when_present() {
        let request = ChatRequest {
            model: "google/gemini-2.5-pro".to_string(),
            messages: vec![ChatMessage::system("prompt")],
            tools: Some(vec![ToolSpec {
                name: "imap-search".to_string(),
                description: "search mail".to_string(),
                input_schema: json!({"type": "object"}),
            }]),
            tool_choice: Some(ToolChoice::Auto),
            response_format_json: false,
        };
        let payload = serde_json::to_value(OpenRouterProvider::payload(&request)).unwrap();
        assert_eq!(payload["tool_choice"], "auto");
        assert_eq!(payload["tools"][0]["type"], "function");
        assert_eq!(payload["tools"][0]["function"]["name"], "imap-search");
        assert!(payload.get("response_format").is_none());
    }

    #[test]
    fn payload_omits_tools_when_absent() {
        let request = ChatRequest::new("google/gemini-2.5-pro", vec![ChatMessage::user("hi")]);
        let payload = serde_json::to_value(OpenRouterProvider::payload(&request)).unwrap();
        assert!(payload.get("tools").is_none());
        assert!(payload.get("tool_choice").is_none());
    }

    #[test]
    fn parse_outcome_extracts_message_usage_and_id() {
        let raw = json!({
            "id": "gen-123",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "imap-search", "arguments": "{\"q\":\"x\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
        });
        let outcome = OpenRouterProvider::parse_outcome(raw).unwrap();
        assert_eq!(outcome.generation_id.as_deref(), Some("gen-123"));
        assert_eq!(outcome.message.tool_calls().len(), 1);
        assert_eq!(outcome.usage.unwrap().total_tokens, 19);
        // The raw body is preserved for logging.
        assert_eq!(outcome.raw["id"], "gen-123");
    }

    #[test]
    fn parse_outcome_without_choices_is_an_error() {
        let result = OpenRouterProvider::parse_outcome(json!({"id": "gen-1", "choices": []}));
        assert!(matches!(result, Err(LlmError::Deserialization(_))));
    }
}
