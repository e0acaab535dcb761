use crate::config::ProviderConfig;
use crate::models::{ChatMessage, Role};
use anyhow::{Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

// Alias for the stream of content deltas returned to callers.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Interface to the hosted LLM service. `complete` is the one-shot request
/// the code-generation pipeline uses; `stream_chat` is the lazy, finite,
/// non-restartable fragment sequence the chat pipeline consumes.
#[async_trait]
pub trait LlmApi: Send + Sync {
    async fn complete(&self, config: &ProviderConfig, api_key: &str, prompt: &str)
        -> Result<String>;

    async fn stream_chat(
        &self,
        config: &ProviderConfig,
        api_key: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<DeltaStream>;
}

// --- OpenAI Compatible Provider Implementation ---

#[derive(Serialize, Debug)]
struct OpenAIRequestBody {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize, Debug)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

// Response structure for streaming chunks
#[derive(Deserialize, Debug)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
}

#[derive(Deserialize, Debug, Clone)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

fn api_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

// Interprets one SSE data payload: Ok(Some(delta)) for content, Ok(None) for
// [DONE] / pings / empty deltas, Err for payloads we cannot make sense of.
fn parse_stream_event(event_data: &str) -> Result<Option<String>> {
    let event_data = event_data.trim();

    if event_data == "[DONE]" {
        log::debug!("Stream finished with [DONE]");
        return Ok(None);
    }

    match serde_json::from_str::<OpenAIStreamChunk>(event_data) {
        Ok(chunk) => Ok(chunk
            .choices
            .first()
            .and_then(|choice| choice.delta.content.clone())),
        Err(e) => {
            // Not a delta chunk. Known event types like pings are skipped;
            // anything else is a real protocol problem.
            match serde_json::from_str::<serde_json::Value>(event_data) {
                Ok(json_value)
                    if json_value.get("type")
                        == Some(&serde_json::Value::String("ping".to_string())) =>
                {
                    log::debug!("Received stream ping event, skipping.");
                    Ok(None)
                }
                Ok(_) => {
                    log::warn!("Unrecognized stream event: {e} - Data: {event_data}");
                    Err(anyhow::Error::from(e)
                        .context(format!("Unrecognized stream event: {event_data}")))
                }
                Err(_) => {
                    log::warn!("Failed to parse stream chunk as JSON: {e} - Data: {event_data}");
                    Err(anyhow::Error::from(e)
                        .context(format!("Failed to parse stream chunk as JSON: {event_data}")))
                }
            }
        }
    }
}

pub struct OpenAICompatibleProvider {
    client: Client,
}

impl OpenAICompatibleProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn post_chat(
        &self,
        config: &ProviderConfig,
        api_key: &str,
        body: &OpenAIRequestBody,
    ) -> Result<reqwest::Response> {
        let request_url = format!("{}/chat/completions", config.api_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&request_url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .context("Failed to send request to LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("LLM API request failed with status {status}: {error_body}");
            return Err(anyhow::anyhow!(
                "API request failed with status {status}: {error_body}"
            ));
        }

        Ok(response)
    }
}

impl Default for OpenAICompatibleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmApi for OpenAICompatibleProvider {
    async fn complete(
        &self,
        config: &ProviderConfig,
        api_key: &str,
        prompt: &str,
    ) -> Result<String> {
        log::info!(
            "Sending completion request to {} using model: {}",
            config.api_url,
            config.model
        );

        let request_body = OpenAIRequestBody {
            model: config.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
        };

        let response = self.post_chat(config, api_key, &request_body).await?;
        let parsed: OpenAIResponse = response
            .json()
            .await
            .context("Failed to parse completion response body")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .context("Completion response contained no choices")
    }

    async fn stream_chat(
        &self,
        config: &ProviderConfig,
        api_key: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<DeltaStream> {
        log::info!(
            "Sending stream request to {} using model: {}",
            config.api_url,
            config.model
        );

        let mut api_messages = vec![OpenAIMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        }];
        api_messages.extend(messages.iter().map(|msg| OpenAIMessage {
            role: api_role(msg.role).to_string(),
            content: msg.content.clone(),
        }));

        let request_body = OpenAIRequestBody {
            model: config.model.clone(),
            messages: api_messages,
            stream: true,
        };

        let response = self.post_chat(config, api_key, &request_body).await?;

        // Process the SSE stream
        let event_stream = response.bytes_stream().eventsource();

        let delta_stream = event_stream
            .map(|event_result| -> Result<Option<String>> {
                let event = event_result.context("Error reading stream event")?;
                parse_stream_event(&event.data)
            })
            .filter_map(|result| async move {
                match result {
                    Ok(Some(content)) => Some(Ok(content)),
                    Ok(None) => None, // [DONE], pings, empty deltas
                    Err(e) => {
                        log::error!("Error processing stream chunk: {e:?}");
                        Some(Err(e))
                    }
                }
            });

        Ok(Box::pin(delta_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_deltas_are_extracted() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        let delta = parse_stream_event(data).unwrap();
        assert_eq!(delta.as_deref(), Some("Hel"));
    }

    #[test]
    fn done_marker_ends_the_content_stream() {
        assert!(parse_stream_event("[DONE]").unwrap().is_none());
        assert!(parse_stream_event("  [DONE]  ").unwrap().is_none());
    }

    #[test]
    fn role_only_first_chunk_yields_no_content() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_stream_event(data).unwrap().is_none());
    }

    #[test]
    fn ping_events_are_skipped() {
        assert!(parse_stream_event(r#"{"type":"ping"}"#).unwrap().is_none());
    }

    #[test]
    fn garbage_payloads_are_errors() {
        assert!(parse_stream_event("not json").is_err());
    }
}
