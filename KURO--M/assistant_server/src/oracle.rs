use std::{fmt::Write as _, time::Duration};

use async_trait::async_trait;
use kuro_actions::{
    capabilities::CapabilityRegistry,
    normalizer::RawDecision,
    pipeline::{DecisionOracle, OracleError},
};
use kuro_memory::MemoryItem;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::OracleConfig;

/// Context lines included in the prompt.
pub const PROMPT_CONTEXT_LIMIT: usize = 3;

const NO_CONTEXT: &str = "No relevant memories found.";

const PERSONA: &str = "You are Kuro, a Jarvis-style AI assistant. You are intelligent, concise, and action-oriented.

**YOUR CORE BEHAVIOR:**
- You respond like Jarvis from Iron Man: brief, professional, helpful
- You NEVER give long explanations unless asked
- You prefer actions over words
- You remember important information automatically";

const DECISION_RULES: &str = "**DECISION RULES:**
- If user shares a fact, preference, or important info -> save_memory
- If user asks \"what do you know about X\" -> recall_memory
- If user asks you to open/launch something -> open_app
- If user asks you to run a command -> run_command
- For power actions, only set \"confirmed\": true when the user explicitly confirmed
- For several steps, return a JSON array of calls in the order to run them
- For simple greetings or questions -> reply";

const RESPONSE_FORMAT: &str = "**RESPONSE FORMAT:**
You MUST respond with valid JSON in this exact format:
{
  \"function\": \"function_name\",
  \"arguments\": {
    \"param1\": \"value1\",
    \"param2\": \"value2\"
  }
}";

/// Renders the capability list shown to the model.
#[must_use]
pub fn capability_section(registry: &CapabilityRegistry) -> String {
    let mut section = String::from(
        "**YOUR CAPABILITIES:**\nYou can call these functions by returning JSON:\n",
    );
    for (position, descriptor) in registry.descriptors().enumerate() {
        let _ = write!(
            section,
            "\n{}. {} - {}",
            position + 1,
            descriptor.name,
            descriptor.description
        );
        for param in descriptor.argument_schema.params() {
            let _ = write!(
                section,
                "\n   - {} ({}{}): {}",
                param.name,
                serde_json::to_value(param.kind)
                    .ok()
                    .and_then(|kind| kind.as_str().map(str::to_owned))
                    .unwrap_or_default(),
                if param.required { ", required" } else { "" },
                param.description
            );
        }
    }
    section
}

/// Renders retrieved memories, at most [`PROMPT_CONTEXT_LIMIT`] of them.
#[must_use]
pub fn context_block(context: &[MemoryItem]) -> String {
    if context.is_empty() {
        return NO_CONTEXT.into();
    }
    context
        .iter()
        .take(PROMPT_CONTEXT_LIMIT)
        .map(MemoryItem::context_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assembles the full decision prompt.
#[must_use]
pub fn build_prompt(capabilities: &str, utterance: &str, context: &[MemoryItem]) -> String {
    format!(
        "{PERSONA}\n\n{capabilities}\n\n{DECISION_RULES}\n\n{RESPONSE_FORMAT}\n\n\
         **MEMORY CONTEXT:**\nBelow is relevant information from your memory. Use it to inform your responses:\n\
         {}\n\n**USER MESSAGE:**\n{utterance}\n\n**YOUR DECISION (JSON only):**",
        context_block(context)
    )
}

/// Maps a failed `generateContent` response onto an [`OracleError`].
#[must_use]
pub fn classify_failure(status: StatusCode, body: &str) -> OracleError {
    let detail = format!("status {status}: {}", body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS
        || body.contains("RESOURCE_EXHAUSTED")
        || body.to_ascii_lowercase().contains("quota")
    {
        OracleError::QuotaExceeded(detail)
    } else {
        OracleError::Unavailable(detail)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Value>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Gemini `generateContent` decision oracle.
///
/// The capability list is rendered once from the registry. Responses are
/// requested as JSON; anything that does not decode becomes an unparseable
/// decision and is handled by the normalizer fallback.
#[derive(Debug, Clone)]
pub struct GeminiOracle {
    client: Client,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    base_url: String,
    capabilities: String,
}

impl GeminiOracle {
    /// Builds the oracle from configuration and the live registry.
    pub fn new(config: &OracleConfig, registry: &CapabilityRegistry) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            capabilities: capability_section(registry),
        })
    }

    /// Whether an API key is present.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Model name in use.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl DecisionOracle for GeminiOracle {
    async fn decide(&self, utterance: &str, context: &[MemoryItem]) -> Result<RawDecision, OracleError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(OracleError::NotConfigured);
        };
        let prompt = build_prompt(&self.capabilities, utterance, context);
        let payload = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                response_mime_type: "application/json",
            },
        };
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .await
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|err| OracleError::Unavailable(format!("undecodable response: {err}")))?;
        let text = body.text();
        tracing::debug!(model = %self.model, chars = text.len(), "oracle responded");
        Ok(RawDecision::from_text(&text))
    }
}
