//! Remote analysis client for the hosted multimodal `generateContent` API.
//!
//! Two operations share one endpoint: structured chest X-ray analysis (image
//! in, JSON out) and synthetic X-ray generation (text in, image out). Each
//! call is one request with no retries or caching.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use medvlm_contracts::analysis::{AnalysisResult, Diagnosis, GeneratedImage, UploadedImage};
use medvlm_contracts::models::{Capability, ModelSelector, ModelSpec};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::error::{error_chain_text, truncate_text, EngineError};

pub const ANALYSIS_TEMPERATURE: f64 = 0.2;
pub const GENERATION_ASPECT_RATIO: &str = "1:1";
pub const STYLE_DIRECTIVE: &str = "Medical chest x-ray, radiograph, dicom style, high quality";

pub const ANALYSIS_INSTRUCTION: &str = "\
You are an expert radiologist AI system (MedVLM).
Analyze this chest X-ray image.
1. Classify it strictly as either 'NORMAL' or 'PNEUMONIA'.
2. Provide a confidence score between 0.0 and 1.0 based on visual evidence of opacities, consolidation, or clear lungs.
3. Write a concise medical report in the style of a radiologist (DICOM style), mentioning lungs, ribs, clavicles, and heart.
4. Briefly describe where the pathology is located if present (Explainability).";

/// One `generateContent` round trip. The credential is passed per call so
/// the client can refuse before the service is ever reached.
pub trait ContentService: Send + Sync {
    fn generate_content(&self, api_key: &str, model: &str, payload: &Value) -> Result<Value>;
}

pub struct HttpContentService {
    api_base: String,
    timeout: Duration,
    http: HttpClient,
}

impl HttpContentService {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl ContentService for HttpContentService {
    fn generate_content(&self, api_key: &str, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint_for_model(model);
        log::debug!("POST {endpoint}");
        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("generateContent request failed ({endpoint})"))?;
        response_json_or_error(response)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().context("response body read failed")?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);
        bail!("service responded {code}: {}", truncate_text(&message, 512));
    }
    serde_json::from_str(&body).context("service returned invalid JSON payload")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisReply {
    diagnosis: Diagnosis,
    confidence: f64,
    report: String,
    #[serde(default)]
    heatmap_explanation: Option<String>,
}

pub struct MedVlmClient {
    service: Arc<dyn ContentService>,
    api_key: Option<String>,
    analysis_model: ModelSpec,
    image_model: ModelSpec,
    warnings: Vec<String>,
}

impl MedVlmClient {
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::new(
            Arc::new(HttpContentService::new(config)),
            config.api_key.clone(),
            config.analysis_model.as_deref(),
            config.image_model.as_deref(),
        )
    }

    pub fn new(
        service: Arc<dyn ContentService>,
        api_key: Option<String>,
        analysis_model: Option<&str>,
        image_model: Option<&str>,
    ) -> Result<Self, EngineError> {
        let selector = ModelSelector::new(None);
        let analysis = selector
            .select(analysis_model, Capability::Analysis)
            .map_err(EngineError::ModelSelection)?;
        let image = selector
            .select(image_model, Capability::ImageGeneration)
            .map_err(EngineError::ModelSelection)?;
        let warnings = [analysis.fallback_reason, image.fallback_reason]
            .into_iter()
            .flatten()
            .collect();

        Ok(Self {
            service,
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            analysis_model: analysis.model,
            image_model: image.model,
            warnings,
        })
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn analysis_model(&self) -> &ModelSpec {
        &self.analysis_model
    }

    pub fn image_model(&self) -> &ModelSpec {
        &self.image_model
    }

    /// Model fallbacks taken while resolving overrides.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn ensure_credential(&self) -> Result<&str, EngineError> {
        self.api_key.as_deref().ok_or(EngineError::MissingCredential)
    }

    pub fn analyze_image(&self, image: &UploadedImage) -> Result<AnalysisResult, EngineError> {
        let api_key = self.ensure_credential()?;
        let payload = analysis_payload(image);

        let started = Instant::now();
        let reply = self
            .service
            .generate_content(api_key, &self.analysis_model.name, &payload)
            .map_err(|err| {
                log::warn!("analysis request failed: {}", error_chain_text(&err, 512));
                EngineError::transport(&err)
            })?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        decode_analysis_reply(&reply)
            .map(|result| result.with_latency_ms(latency_ms))
            .inspect_err(|err| log::warn!("analysis reply rejected: {err}"))
    }

    pub fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, EngineError> {
        let api_key = self.ensure_credential()?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(EngineError::InvalidInput("prompt is empty".to_string()));
        }
        let refined = refine_prompt(prompt);
        let payload = generation_payload(&refined);

        let reply = self
            .service
            .generate_content(api_key, &self.image_model.name, &payload)
            .map_err(|err| {
                log::warn!("generation request failed: {}", error_chain_text(&err, 512));
                EngineError::transport(&err)
            })?;
        let Some((bytes, mime_type)) = extract_first_image(&reply)? else {
            log::warn!("generation reply carried no image part");
            return Err(EngineError::NoImage);
        };
        GeneratedImage::new(bytes, mime_type.as_deref(), refined).map_err(EngineError::Decode)
    }
}

pub fn refine_prompt(prompt: &str) -> String {
    format!("{STYLE_DIRECTIVE}, {}", prompt.trim())
}

pub fn analysis_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "diagnosis": {
                "type": "STRING",
                "enum": Diagnosis::ALL.iter().map(|value| value.as_str()).collect::<Vec<_>>(),
            },
            "confidence": {
                "type": "NUMBER",
                "description": "A number between 0 and 1",
            },
            "report": {
                "type": "STRING",
                "description": "Medical report text",
            },
            "heatmapExplanation": {
                "type": "STRING",
                "description": "Description of the region of interest",
            },
        },
        "required": ["diagnosis", "confidence", "report"],
    })
}

pub fn analysis_payload(image: &UploadedImage) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {
                    "inlineData": {
                        "mimeType": image.media_type(),
                        "data": image.base64_payload(),
                    }
                },
                { "text": ANALYSIS_INSTRUCTION },
            ],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": analysis_response_schema(),
            "temperature": ANALYSIS_TEMPERATURE,
        },
    })
}

pub fn generation_payload(refined_prompt: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": refined_prompt }],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": { "aspectRatio": GENERATION_ASPECT_RATIO },
        },
    })
}

fn candidate_parts(reply: &Value) -> impl Iterator<Item = &Value> {
    reply
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.pointer("/content/parts").and_then(Value::as_array))
        .flatten()
}

fn reply_text(reply: &Value) -> String {
    let first_candidate = reply
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    first_candidate
        .into_iter()
        .flatten()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>()
}

pub fn decode_analysis_reply(reply: &Value) -> Result<AnalysisResult, EngineError> {
    let text = reply_text(reply);
    if text.trim().is_empty() {
        let reason = reply
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            .map(|reason| format!("no response text (blocked: {reason})"))
            .unwrap_or_else(|| "no response text".to_string());
        return Err(EngineError::Decode(reason));
    }
    let parsed: AnalysisReply = serde_json::from_str(text.trim())
        .map_err(|err| EngineError::Decode(format!("reply does not match schema: {err}")))?;
    let result = AnalysisResult::new(parsed.diagnosis, parsed.confidence, parsed.report)
        .with_explanation(parsed.heatmap_explanation);
    result.validate().map_err(EngineError::Decode)?;
    Ok(result)
}

/// First inline image across all candidates, as raw bytes and mime type.
pub fn extract_first_image(reply: &Value) -> Result<Option<(Vec<u8>, Option<String>)>, EngineError> {
    for part in candidate_parts(reply) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|err| EngineError::Decode(format!("image base64 decode failed: {err}")))?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(Some((bytes, mime_type)));
    }
    Ok(None)
}
