//! Ollama classifier for text the rules cannot place.
//!
//! Calls the local Ollama HTTP API (`/api/chat`) with a fixed system prompt
//! and expects a JSON object naming one command kind plus its parameters.
//! Anything unreachable, malformed, unknown or low-confidence becomes an
//! `Unknown` command.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sf_protocol::{Command, CommandKind, CommandParams};

use super::IntentClassifier;

const TIER: &str = "ollama";

const SYSTEM_PROMPT: &str = r#"You classify infrastructure operator requests into commands.

Command kinds:

1. create_resource — create a deployment, cache cluster or compute instance group.
   Parameters: {"kind": "deployment|cache_cluster|compute_instance", "name": "web",
   "scope": "default", "image": "nginx:latest", "replicas": 1, "engine": "redis",
   "nodes": 1, "instance_type": "t3.medium", "count": 1}

2. scale_resource — change the size of an existing resource.
   Parameters: {"target": "frontend", "replicas": 5, "kind": "deployment", "scope": "default"}

3. delete_resource — remove an existing resource.
   Parameters: {"target": "frontend", "kind": "deployment", "scope": "default"}

4. query_status — read status, health or cost.
   Parameters: {"target": "frontend", "topic": "status|health|cost"}

Only include parameters the operator actually stated.

Respond with ONLY a JSON object (no markdown, no explanation):
{"kind": "<kind>", "params": {<params>}, "confidence": <0.0-1.0>}

If the request is not one of these commands, respond with:
{"kind": null, "params": {}, "confidence": 0.0}"#;

/// Below this the answer is treated as "no match".
const MIN_CONFIDENCE: f64 = 0.3;

/// Configuration for the Ollama endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Off unless explicitly enabled.
    #[serde(default)]
    pub enabled: bool,
}

fn default_host() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "phi3:mini".into()
}
fn default_timeout_secs() -> u64 {
    5
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            enabled: false,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    format: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Ollama chat API response (only fields we need).
#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Raw model output before validation.
#[derive(Deserialize)]
struct RawIntent {
    kind: Option<String>,
    #[serde(default)]
    params: CommandParams,
    #[serde(default)]
    confidence: f64,
}

pub struct OllamaClassifier {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaClassifier {
    pub fn new(config: OllamaConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Ask the model. `None` for every kind of miss.
    async fn ask(&self, text: &str) -> Option<Command> {
        let url = format!("{}/api/chat", self.config.host);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            format: "json",
            stream: false,
        };

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "ollama request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "ollama returned non-200");
            return None;
        }
        let chat: ChatResponse = match response.json().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse ollama response body");
                return None;
            }
        };

        let content = chat.message?.content;
        let raw: RawIntent = match serde_json::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, content = %content, "ollama returned invalid JSON");
                return None;
            }
        };

        let kind_name = raw.kind?;
        let kind = match serde_json::from_value::<CommandKind>(serde_json::Value::String(
            kind_name.clone(),
        )) {
            Ok(CommandKind::Unknown) | Err(_) => {
                tracing::warn!(kind = %kind_name, "ollama returned unknown command kind");
                return None;
            }
            Ok(kind) => kind,
        };
        if raw.confidence < MIN_CONFIDENCE {
            tracing::debug!(confidence = raw.confidence, kind = %kind_name, "ollama confidence below threshold");
            return None;
        }

        Some(Command::new(kind, text, raw.params, raw.confidence, TIER))
    }
}

#[async_trait]
impl IntentClassifier for OllamaClassifier {
    async fn classify(&self, text: &str) -> Command {
        if text.trim().is_empty() {
            return Command::unrecognized(text, TIER);
        }
        match self.ask(text).await {
            Some(cmd) => cmd,
            None => Command::unrecognized(text, TIER),
        }
    }

    fn tier_name(&self) -> &str {
        TIER
    }
}
