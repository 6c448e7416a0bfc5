use async_trait::async_trait;
use serde_json::json;

use crate::{
    ContentPart, FinishReason, Message, ProviderAdapter, Request, Response, ResponseFormat, Role,
    Usage,
};
use slidecast_types::SlidecastError;

pub(crate) const PROVIDER: &str = "google";
pub(crate) const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Text model used when a request leaves `model` empty.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

/// Read the Gemini API key from `GOOGLE_API_KEY`, then `GEMINI_API_KEY`.
pub fn api_key_from_env() -> Result<String, SlidecastError> {
    std::env::var("GOOGLE_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .map_err(|_| SlidecastError::AuthError {
            provider: PROVIDER.into(),
        })
}

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GeminiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn from_env() -> Result<Self, SlidecastError> {
        Ok(Self::new(api_key_from_env()?))
    }

    fn build_request_body(&self, request: &Request) -> serde_json::Value {
        // 1. System messages become systemInstruction
        let system_texts: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| m.content.iter().map(|ContentPart::Text { text }| text.clone()))
            .collect();

        // 2. Everything else becomes contents
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(convert_message)
            .collect();

        let mut body = json!({
            "contents": contents,
        });

        if !system_texts.is_empty() {
            let parts: Vec<serde_json::Value> = system_texts
                .iter()
                .map(|t| json!({ "text": t }))
                .collect();
            body["systemInstruction"] = json!({ "parts": parts });
        }

        // 3. Generation config
        let mut gen_config = json!({});
        if let Some(max_tokens) = request.max_tokens {
            gen_config["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            gen_config["temperature"] = json!(temp);
        }
        if request.response_format == ResponseFormat::Json {
            gen_config["responseMimeType"] = json!("application/json");
        }
        if gen_config.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = gen_config;
        }

        body
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<Response, SlidecastError> {
        let candidate = first_candidate(&json)?;

        let finish_reason = match candidate["finishReason"].as_str() {
            Some("MAX_TOKENS") => FinishReason::MaxTokens,
            Some("SAFETY") | Some("PROHIBITED_CONTENT") => FinishReason::Safety,
            Some("STOP_SEQUENCE") => FinishReason::StopSequence,
            _ => FinishReason::EndTurn,
        };

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage_meta = &json["usageMetadata"];
        let input_tokens = usage_meta["promptTokenCount"].as_u64().unwrap_or(0);
        let output_tokens = usage_meta["candidatesTokenCount"].as_u64().unwrap_or(0);
        let total_tokens = usage_meta["totalTokenCount"]
            .as_u64()
            .unwrap_or(input_tokens + output_tokens);

        Ok(Response {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens,
            },
            model: String::new(),
            finish_reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Message conversion helpers
// ---------------------------------------------------------------------------

/// Non-system messages are sent as user turns; the pipeline never replays
/// model turns.
fn convert_message(msg: &Message) -> serde_json::Value {
    let parts: Vec<serde_json::Value> = msg
        .content
        .iter()
        .map(|ContentPart::Text { text }| json!({ "text": text }))
        .collect();

    json!({
        "role": "user",
        "parts": parts
    })
}

pub(crate) fn first_candidate(
    json: &serde_json::Value,
) -> Result<&serde_json::Value, SlidecastError> {
    let candidates = json["candidates"]
        .as_array()
        .ok_or_else(|| SlidecastError::ProviderError {
            provider: PROVIDER.into(),
            status: 0,
            message: "Missing candidates in response".into(),
            retryable: false,
        })?;

    candidates.first().ok_or_else(|| SlidecastError::ProviderError {
        provider: PROVIDER.into(),
        status: 0,
        message: "Empty candidates array".into(),
        retryable: false,
    })
}

// ---------------------------------------------------------------------------
// Transport and error mapping
// ---------------------------------------------------------------------------

pub(crate) fn map_error(status: reqwest::StatusCode, body: &str) -> SlidecastError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => SlidecastError::RateLimited {
            provider: PROVIDER.into(),
            retry_after_ms: 1000,
        },
        401 | 403 => SlidecastError::AuthError {
            provider: PROVIDER.into(),
        },
        500 | 502 | 503 | 504 => SlidecastError::ProviderError {
            provider: PROVIDER.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => SlidecastError::ProviderError {
            provider: PROVIDER.into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

pub(crate) fn transport_error(e: reqwest::Error) -> SlidecastError {
    if e.is_timeout() {
        return SlidecastError::RequestTimeout {
            provider: PROVIDER.into(),
            timeout_ms: 0,
        };
    }
    SlidecastError::ProviderError {
        provider: PROVIDER.into(),
        status: 0,
        message: e.to_string(),
        retryable: true,
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

/// POST a JSON body and return the parsed JSON reply, mapping HTTP failures.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value, SlidecastError> {
    let resp = client
        .post(url)
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(transport_error)?;
    read_json(resp).await
}

pub(crate) async fn read_json(
    resp: reqwest::Response,
) -> Result<serde_json::Value, SlidecastError> {
    let status = resp.status();
    let response_body = resp.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(map_error(status, &response_body));
    }

    serde_json::from_str(&response_body).map_err(|e| SlidecastError::ProviderError {
        provider: PROVIDER.into(),
        status: status.as_u16(),
        message: format!("Failed to parse response JSON: {e}"),
        retryable: false,
    })
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, SlidecastError> {
        let body = self.build_request_body(request);
        let model = if request.model.is_empty() {
            DEFAULT_TEXT_MODEL
        } else {
            request.model.as_str()
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let json = post_json(&self.client, &url, &body).await?;
        let mut response = self.parse_response(json)?;
        response.model = model.to_string();
        Ok(response)
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
