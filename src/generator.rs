use crate::types::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Structured prompt payload for one generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_words: usize,
}

/// What the external generator returns. Treated as an untrusted variant:
/// the enrichment engine validates it before accepting it as success.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// External text generator, consumed as a black box: structured prompt in,
/// structured text out, or failure. One attempt per item; no retry contract.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Generator backed by an OpenAI-style chat-completions endpoint. The
/// model is asked for a JSON object with `title` and `content`; anything
/// that does not deserialize into that shape is a generation failure.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    fn name(&self) -> &str {
        "http-chat-completions"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: format!(
                        "{}\nRespond with a JSON object containing exactly two string fields: \"title\" and \"content\". Aim for about {} words of content.",
                        request.system, request.max_words
                    ),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            temperature: 0.7,
        };

        debug!("Calling generator {} (model {})", self.base_url, self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Enrichment(format!(
                "generator returned HTTP {}",
                status
            )));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| PipelineError::Enrichment("generator returned no choices".to_string()))?;

        // Models sometimes fence the JSON in markdown.
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let parsed: GenerationResponse = serde_json::from_str(trimmed).map_err(|e| {
            PipelineError::Enrichment(format!("generator returned malformed payload: {}", e))
        })?;

        Ok(parsed)
    }
}

/// Deterministic generator double for tests and local development.
/// Grounds a prompt into a fixed "polished" shape, with configurable
/// delay and failure triggers.
pub struct MockGenerator {
    name: String,
    delay_ms: u64,
    fail_all: bool,
    fail_when_prompt_contains: Option<String>,
}

impl MockGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay_ms: 0,
            fail_all: false,
            fail_when_prompt_contains: None,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Every call fails, as if the generator service were down.
    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Fail only for prompts containing the marker, to force a failure on
    /// one item of a batch.
    pub fn fail_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_when_prompt_contains = Some(marker.into());
        self
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        if self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }

        if self.fail_all {
            return Err(PipelineError::Enrichment("mock generator is down".to_string()));
        }
        if let Some(ref marker) = self.fail_when_prompt_contains {
            if request.prompt.contains(marker) {
                return Err(PipelineError::Enrichment(format!(
                    "mock generator forced failure on marker '{}'",
                    marker
                )));
            }
        }

        let first_line = request.prompt.lines().next().unwrap_or("").trim().to_string();
        Ok(GenerationResponse {
            title: if first_line.is_empty() { "Generated article".to_string() } else { first_line },
            content: format!(
                "## Race briefing\n\n{}\n\nThis story is developing and the paddock is watching closely.",
                request.prompt
            ),
        })
    }
}
