use crate::error::StageError;
use crate::traits::{Generation, GenerationRequest, Generator};
use crate::usage::TokenUsage;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use tracing::debug;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

const SCHEMA_KEYWORDS: [&str; 9] = [
    "type",
    "description",
    "enum",
    "properties",
    "required",
    "items",
    "minItems",
    "maxItems",
    "nullable",
];

pub struct GeminiGenerator {
    endpoint: String,
    model: String,
    api_key: String,
    client: Client,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL, api_key)
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }
}

/// Gemini's type for a JSON Schema `type`, and whether it admits null.
/// `["string", "null"]` becomes a nullable `STRING`.
fn gemini_type(value: &Value) -> (String, bool) {
    match value {
        Value::Array(types) => {
            let names = types.iter().filter_map(Value::as_str).collect::<Vec<_>>();
            let primary = names.iter().find(|name| **name != "null").copied().unwrap_or("string");
            (primary.to_uppercase(), names.contains(&"null"))
        }
        other => (other.as_str().unwrap_or("string").to_uppercase(), false),
    }
}

/// Rewrites a pipeline schema descriptor into Gemini's `responseSchema`
/// dialect: upper-case type names, unsupported keywords dropped.
pub fn to_response_schema(schema: &Value) -> Value {
    let Some(object) = schema.as_object() else {
        return schema.clone();
    };

    let mut converted = Map::new();
    let mut nullable = false;
    for key in SCHEMA_KEYWORDS {
        let Some(value) = object.get(key) else {
            continue;
        };
        let value = match key {
            "type" => {
                let (name, admits_null) = gemini_type(value);
                nullable = admits_null;
                Value::String(name)
            }
            "properties" => Value::Object(
                value
                    .as_object()
                    .map(|properties| {
                        properties
                            .iter()
                            .map(|(name, property)| (name.clone(), to_response_schema(property)))
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            "items" => to_response_schema(value),
            _ => value.clone(),
        };
        converted.insert(key.to_string(), value);
    }
    if nullable {
        converted.insert("nullable".to_string(), Value::Bool(true));
    }
    Value::Object(converted)
}

pub fn request_body(request: &GenerationRequest) -> Value {
    json!({
        "system_instruction": {
            "parts": [{ "text": request.system }]
        },
        "contents": [{
            "role": "user",
            "parts": [{ "text": request.prompt }]
        }],
        "generationConfig": {
            "temperature": request.temperature,
            "candidateCount": 1,
            "responseMimeType": "application/json",
            "responseSchema": to_response_schema(&request.schema),
        }
    })
}

/// Pulls the JSON object out of a `generateContent` response.
pub fn parse_response(body: &Value) -> Result<Value, StageError> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| StageError::Schema("response has no candidate content".to_string()))?;

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();

    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|inner| inner.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    Ok(serde_json::from_str(unfenced)?)
}

/// Token counts from `usageMetadata`; absent fields count as zero.
pub fn parse_usage(body: &Value) -> TokenUsage {
    let count = |pointer: &str| body.pointer(pointer).and_then(Value::as_u64).unwrap_or(0);
    TokenUsage {
        input_tokens: count("/usageMetadata/promptTokenCount"),
        output_tokens: count("/usageMetadata/candidatesTokenCount"),
    }
}

/// Error for a non-success status. Timeouts, throttling and server faults
/// may clear on retry; any other status rejects the request itself.
pub fn status_error(status: StatusCode, body: &str) -> StageError {
    let snippet = body.chars().take(200).collect::<String>();
    let details = format!("{status}: {snippet}");
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        StageError::unavailable("gemini", details)
    } else {
        StageError::rejected("gemini", details)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, StageError> {
        debug!(model = %self.model, prompt_chars = request.prompt.len(), "gemini generate");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let parsed: Value = serde_json::from_str(&body)?;
        let usage = parse_usage(&parsed);
        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "gemini usage"
        );
        Ok(Generation {
            value: parse_response(&parsed)?,
            usage,
        })
    }
}
