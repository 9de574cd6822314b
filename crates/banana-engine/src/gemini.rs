use std::iter;

use banana_contracts::session::{Part, Role, Turn, Usage};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::GeminiConfig;
use crate::error::ServiceError;

/// One generation call: the replayed history plus the new user message.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub history: Vec<Turn>,
    pub message: Turn,
    pub aspect_ratio: String,
    pub image_size: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReply {
    /// The model's turn, with every part the backend returned.
    pub turn: Turn,
    pub usage: Usage,
}

pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, ServiceError>;
}

/// The key travels in a header so it never shows up in a request URL, and
/// with it in transport errors or logs.
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiGenerator {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Result<Self, ServiceError> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ServiceError::Transport)?;
        Ok(Self { config, http })
    }

    fn endpoint_for_model(&self, model_id: &str) -> String {
        format!("{}/models/{}:generateContent", self.config.api_base, model_id)
    }
}

impl ImageGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, ServiceError> {
        let payload = build_payload(request)?;
        let endpoint = self.endpoint_for_model(&request.model_id);
        info!(
            model = %request.model_id,
            history = request.history.len(),
            "sending generation request"
        );

        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .json(&payload)
            .send()
            .map_err(ServiceError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = response.json().map_err(ServiceError::Transport)?;
        parse_reply(&body)
    }
}

/// Request body for `generateContent`. Text and image modalities are both
/// requested so the reply can carry commentary next to the image.
pub fn build_payload(request: &GenerationRequest) -> Result<Value, ServiceError> {
    let contents = request
        .history
        .iter()
        .chain(iter::once(&request.message))
        .map(serde_json::to_value)
        .collect::<Result<Vec<Value>, _>>()
        .map_err(|err| ServiceError::Malformed(err.to_string()))?;

    let mut image_config = Map::new();
    image_config.insert(
        "aspectRatio".to_string(),
        Value::String(request.aspect_ratio.clone()),
    );
    if let Some(size) = request.image_size.as_ref() {
        image_config.insert("imageSize".to_string(), Value::String(size.clone()));
    }

    Ok(json!({
        "contents": contents,
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
            "imageConfig": image_config,
        },
    }))
}

/// Turns a `generateContent` response body into the model turn.
///
/// No candidates means the prompt was rejected up front (`promptFeedback`)
/// or the backend had nothing to say; a candidate without content was
/// stopped mid-generation and its finish reason is the block reason.
pub fn parse_reply(body: &Value) -> Result<GenerationReply, ServiceError> {
    let candidate = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first());
    let Some(candidate) = candidate else {
        let reason = body
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty());
        return Err(match reason {
            Some(reason) => ServiceError::Blocked {
                reason: reason.to_string(),
            },
            None => ServiceError::Empty {
                raw: serde_json::to_string_pretty(body).unwrap_or_default(),
            },
        });
    };

    let Some(content) = candidate.get("content").filter(|value| !value.is_null()) else {
        let reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(ServiceError::Blocked {
            reason: reason.to_string(),
        });
    };

    let parts: Vec<Part> = match content.get("parts") {
        Some(parts) if !parts.is_null() => serde_json::from_value(parts.clone())
            .map_err(|err| ServiceError::Malformed(err.to_string()))?,
        _ => Vec::new(),
    };
    debug!(parts = parts.len(), "received model turn");

    Ok(GenerationReply {
        turn: Turn::new(Role::Model, parts),
        usage: parse_usage(body.get("usageMetadata")),
    })
}

fn parse_usage(value: Option<&Value>) -> Usage {
    let count = |key: &str| {
        value
            .and_then(|usage| usage.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    Usage {
        prompt_tokens: count("promptTokenCount"),
        candidate_tokens: count("candidatesTokenCount"),
        total_tokens: count("totalTokenCount"),
    }
}

/// Visible text and the first non-thought image of a reply.
pub fn extract_result(turn: &Turn) -> Result<(String, Vec<u8>), ServiceError> {
    let blob = turn
        .parts
        .iter()
        .filter(|part| !part.thought)
        .find(|part| part.has_image_data())
        .and_then(|part| part.inline_data.as_ref())
        .ok_or(ServiceError::NoImage)?;
    let image = blob
        .decode()
        .map_err(|err| ServiceError::Malformed(format!("image data: {err}")))?;
    Ok((turn.visible_text(), image))
}
