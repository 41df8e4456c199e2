use std::error::Error as _;
use std::time::Duration;

use fitroom_contracts::images::EncodedImage;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{run_cancellable, CancelToken, GenerationGateway, GenerationRequest};
use crate::config::FitroomConfig;
use crate::errors::GatewayError;

const API_KEY_HEADER: &str = "x-goog-api-key";
const DEFAULT_RESPONSE_MEDIA_TYPE: &str = "image/png";
const ERROR_BODY_MAX_CHARS: usize = 512;

/// Google Gemini `generateContent` with inline image parts.
pub struct GeminiGateway {
    api_base: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiGateway {
    pub fn new(config: &FitroomConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.image_model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub(crate) fn build_payload(request: &GenerationRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_part(&request.subject),
                    inline_part(&request.garment),
                    { "text": request.instruction },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        })
    }

    /// Takes the first inline image of the first candidate.
    pub(crate) fn extract_image(response: &Value) -> Result<EncodedImage, GatewayError> {
        let candidate = response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .ok_or(GatewayError::NoCandidate)?;
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut texts = Vec::new();
        for part in &parts {
            if let Some(inline) = inline_data(part) {
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !data.is_empty() {
                    let media_type = inline
                        .get("mimeType")
                        .or_else(|| inline.get("mime_type"))
                        .and_then(Value::as_str)
                        .unwrap_or(DEFAULT_RESPONSE_MEDIA_TYPE);
                    return EncodedImage::from_base64(media_type, data)
                        .map_err(|err| GatewayError::InvalidImage(err.to_string()));
                }
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                texts.push(text.trim().to_string());
            }
        }

        let said = truncate_text(texts.join(" ").trim(), ERROR_BODY_MAX_CHARS);
        let said = Some(said).filter(|text| !text.is_empty());
        Err(GatewayError::NoImage(said))
    }
}

impl GenerationGateway for GeminiGateway {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<EncodedImage, GatewayError> {
        let Some(api_key) = self.api_key.clone() else {
            return Err(GatewayError::MissingCredential);
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request);
        let http = self.http.clone();
        let timeout = self.timeout;

        let job = move || post_json(&http, &endpoint, &api_key, &payload, timeout);
        let response = run_cancellable(cancel, "fitroom-gemini", job)?;
        Self::extract_image(&response)
    }
}

fn inline_data(part: &Value) -> Option<&Value> {
    part.get("inlineData").or_else(|| part.get("inline_data"))
}

fn inline_part(image: &EncodedImage) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.media_type(),
            "data": image.payload(),
        }
    })
}

fn post_json(
    http: &HttpClient,
    endpoint: &str,
    api_key: &str,
    payload: &Value,
    timeout: Duration,
) -> Result<Value, GatewayError> {
    let response = http
        .post(endpoint)
        .header(API_KEY_HEADER, api_key)
        .timeout(timeout)
        .json(payload)
        .send()
        .map_err(|err| transport_error(err, timeout))?;

    let status = response.status();
    let body = match response.text() {
        Ok(body) => body,
        Err(err) => return Err(transport_error(err, timeout)),
    };
    if !status.is_success() {
        return Err(GatewayError::Status {
            code: status.as_u16(),
            body: truncate_text(body.trim(), ERROR_BODY_MAX_CHARS),
        });
    }
    serde_json::from_str(&body)
        .map_err(|err| GatewayError::InvalidResponse(err.to_string()))
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::Timeout(timeout.as_secs().max(1));
    }
    let err = err.without_url();
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.trim().is_empty() && !message.contains(text.trim()) {
            message.push_str(" | caused by: ");
            message.push_str(text.trim());
        }
        source = cause.source();
    }
    GatewayError::Unreachable(message)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
