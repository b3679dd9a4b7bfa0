use std::env;
use std::error::Error as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dauber_contracts::conversation::{ConversationEntry, DEFAULT_USER_TEXT};
use dauber_contracts::frames::Frame;
use dauber_contracts::prompts::{build_system_prompt, TouchLevel};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde_json::{json, Value};
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
pub const MODEL: &str = "claude-sonnet-4-20250514";
pub const MAX_TOKENS: u32 = 1024;
pub const VALIDATION_MAX_TOKENS: u32 = 10;
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Ten exchanges.
pub const MAX_HISTORY_ENTRIES: usize = 20;
pub const KEY_PREFIX: &str = "sk-ant-";
const MIN_KEY_LEN: usize = 21;
const VALIDATION_PROMPT: &str = "Say \"ok\"";
const EVOLUTION_NOTE: &str =
    "You can reference how the painting has evolved between these two states.";

/// Everything one feedback turn is built from.
#[derive(Debug, Clone)]
pub struct FeedbackRequest<'a> {
    pub credential: &'a str,
    pub current_frame: &'a Frame,
    pub compare_frame: Option<&'a Frame>,
    pub touch_level: TouchLevel,
    pub session_context: &'a str,
    /// Earlier turns, oldest first. Callers window this with
    /// `ConversationLog::recent(MAX_HISTORY_ENTRIES)`.
    pub history: &'a [ConversationEntry],
    pub follow_up: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackResponse {
    pub content: String,
    /// Server `usage` object, untouched.
    pub usage: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackError {
    #[error("Invalid API key")]
    InvalidCredential,
    #[error("Rate limited. {}", rate_limit_hint(.retry_after))]
    RateLimited { retry_after: Option<String> },
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Connection error: {0}")]
    Transport(String),
    #[error("Unexpected API response: {0}")]
    MalformedResponse(String),
}

impl FeedbackError {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedbackError::InvalidCredential => "credential-invalid",
            FeedbackError::RateLimited { .. } => "rate-limited",
            FeedbackError::InvalidRequest(_) => "malformed-request",
            FeedbackError::Api { .. } | FeedbackError::MalformedResponse(_) => "api-error",
            FeedbackError::Transport(_) => "transport-error",
        }
    }
}

fn rate_limit_hint(retry_after: &Option<String>) -> String {
    match retry_after.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(seconds) => format!("Try again in {seconds} seconds."),
        None => "Please wait a moment.".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValidation {
    Valid,
    /// The server throttled the validation request, which it only does for real keys.
    RateLimited,
    Invalid(String),
}

impl KeyValidation {
    pub fn is_valid(&self) -> bool {
        !matches!(self, KeyValidation::Invalid(_))
    }
}

/// The remote side of a studio session.
pub trait FeedbackProvider {
    fn request_feedback(
        &self,
        request: &FeedbackRequest<'_>,
    ) -> Result<FeedbackResponse, FeedbackError>;

    fn validate_key(&self, key: &str) -> KeyValidation;
}

pub fn is_valid_key_format(key: &str) -> bool {
    key.starts_with(KEY_PREFIX) && key.chars().count() >= MIN_KEY_LEN
}

pub struct AnthropicClient {
    api_base: String,
    http: HttpClient,
}

impl AnthropicClient {
    pub fn new() -> Self {
        let api_base = env::var("ANTHROPIC_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::with_api_base(api_base)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
        }
    }

    /// Applies a whole-request timeout; without one the transport default
    /// stands.
    pub fn with_timeout(mut self, timeout: Duration) -> anyhow::Result<Self> {
        self.http = HttpClient::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.api_base)
    }

    fn post(&self, credential: &str, payload: &Value) -> Result<HttpResponse, FeedbackError> {
        self.http
            .post(self.endpoint())
            .header(CONTENT_TYPE, "application/json")
            .header("x-api-key", credential)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-dangerous-direct-browser-access", "true")
            .json(payload)
            .send()
            .map_err(|err| FeedbackError::Transport(transport_error_text(&err)))
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackProvider for AnthropicClient {
    fn request_feedback(
        &self,
        request: &FeedbackRequest<'_>,
    ) -> Result<FeedbackResponse, FeedbackError> {
        let payload = build_payload(request, Utc::now());
        let response = self.post(request.credential, &payload)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .map_err(|err| FeedbackError::Transport(transport_error_text(&err)))?;

        if !(200..300).contains(&status) {
            let err = classify_error_response(status, retry_after.as_deref(), &body);
            tracing::warn!(status, kind = err.kind(), "feedback request failed: {err}");
            return Err(err);
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| FeedbackError::MalformedResponse(err.to_string()))?;
        if !parsed.get("content").map(Value::is_array).unwrap_or(false) {
            return Err(FeedbackError::MalformedResponse(
                "missing content blocks".to_string(),
            ));
        }
        Ok(FeedbackResponse {
            content: extract_text(&parsed),
            usage: parsed.get("usage").cloned().unwrap_or(Value::Null),
        })
    }

    fn validate_key(&self, key: &str) -> KeyValidation {
        let payload = json!({
            "model": MODEL,
            "max_tokens": VALIDATION_MAX_TOKENS,
            "messages": [{ "role": "user", "content": VALIDATION_PROMPT }],
        });
        let response = match self.post(key, &payload) {
            Ok(response) => response,
            Err(err) => return KeyValidation::Invalid(err.to_string()),
        };
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return KeyValidation::Valid;
        }
        if status == 429 {
            return KeyValidation::RateLimited;
        }
        let body = response.text().unwrap_or_default();
        match classify_error_response(status, None, &body) {
            FeedbackError::InvalidCredential => KeyValidation::Invalid("Invalid API key".to_string()),
            FeedbackError::InvalidRequest(_) => KeyValidation::Invalid(
                server_error_message(&body).unwrap_or_else(|| format!("API error ({status})")),
            ),
            other => KeyValidation::Invalid(other.to_string()),
        }
    }
}

/// Maps a non-2xx reply to the message shown next to the trigger.
pub fn classify_error_response(status: u16, retry_after: Option<&str>, body: &str) -> FeedbackError {
    let server_message = server_error_message(body);
    match status {
        401 => FeedbackError::InvalidCredential,
        429 => FeedbackError::RateLimited {
            retry_after: retry_after
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        },
        400 => FeedbackError::InvalidRequest(
            server_message.unwrap_or_else(|| "Invalid request".to_string()),
        ),
        _ => FeedbackError::Api {
            status,
            message: server_message.unwrap_or_else(|| format!("API error ({status})")),
        },
    }
}

fn server_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn transport_error_text(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.trim().is_empty() && parts.last() != Some(&text) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

/// All `text` blocks of a Messages reply, blank-line separated.
pub fn extract_text(response: &Value) -> String {
    response
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("\n\n")
        })
        .unwrap_or_default()
}

pub fn build_payload(request: &FeedbackRequest<'_>, now: DateTime<Utc>) -> Value {
    json!({
        "model": MODEL,
        "max_tokens": MAX_TOKENS,
        "system": build_system_prompt(request.touch_level, request.session_context),
        "messages": build_messages(request, now),
    })
}

pub fn build_messages(request: &FeedbackRequest<'_>, now: DateTime<Utc>) -> Vec<Value> {
    let mut messages = history_messages(request.history);
    let content = match request.follow_up {
        Some(text) => vec![image_block(request.current_frame), text_block(text)],
        None => build_user_content(request.current_frame, request.compare_frame, now),
    };
    messages.push(json!({ "role": "user", "content": content }));
    messages
}

/// Conversation entries as Messages API turns.
pub fn history_messages(history: &[ConversationEntry]) -> Vec<Value> {
    history
        .iter()
        .map(|entry| match entry {
            ConversationEntry::User { display_text, .. } => json!({
                "role": "user",
                "content": [text_block(
                    display_text
                        .as_deref()
                        .filter(|text| !text.is_empty())
                        .unwrap_or(DEFAULT_USER_TEXT),
                )],
            }),
            ConversationEntry::Assistant { content, .. } => json!({
                "role": "assistant",
                "content": content,
            }),
        })
        .collect()
}

pub fn build_user_content(
    current_frame: &Frame,
    compare_frame: Option<&Frame>,
    now: DateTime<Utc>,
) -> Vec<Value> {
    let mut content = Vec::new();

    if let Some(compare) = compare_frame {
        let minutes = minutes_since(compare.timestamp, now);
        content.push(text_block(&format!(
            "Earlier state ({minutes} minute{} ago):",
            if minutes == 1 { "" } else { "s" }
        )));
        content.push(image_block(compare));
    }

    content.push(text_block(if compare_frame.is_some() {
        "Current state:"
    } else {
        "Current state of the canvas:"
    }));
    content.push(image_block(current_frame));

    if compare_frame.is_some() {
        content.push(text_block(EVOLUTION_NOTE));
    }
    content
}

fn minutes_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed_ms = (now - earlier).num_milliseconds();
    (elapsed_ms as f64 / 60_000.0).round() as i64
}

fn text_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

fn image_block(frame: &Frame) -> Value {
    json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": "image/jpeg",
            "data": frame.base64_payload(),
        }
    })
}
