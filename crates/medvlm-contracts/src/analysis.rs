use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Media types the analysis service accepts as inline image payloads.
pub const RECOGNIZED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Diagnosis {
    Normal,
    Pneumonia,
}

impl Diagnosis {
    pub const ALL: [Diagnosis; 2] = [Diagnosis::Normal, Diagnosis::Pneumonia];

    pub fn as_str(self) -> &'static str {
        match self {
            Diagnosis::Normal => "NORMAL",
            Diagnosis::Pneumonia => "PNEUMONIA",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|value| value.as_str() == normalized)
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one successful analysis call.
///
/// Field names on the wire follow the service contract (`heatmapExplanation`,
/// `latency`), so a result can be echoed back as the JSON the service produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub diagnosis: Diagnosis,
    pub confidence: f64,
    pub report: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heatmap_explanation: Option<String>,
    #[serde(default, rename = "latency", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl AnalysisResult {
    pub fn new(diagnosis: Diagnosis, confidence: f64, report: impl Into<String>) -> Self {
        Self {
            diagnosis,
            confidence,
            report: report.into(),
            heatmap_explanation: None,
            latency_ms: None,
        }
    }

    pub fn with_explanation(mut self, explanation: Option<String>) -> Self {
        self.heatmap_explanation = explanation
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence {} is outside [0, 1]",
                self.confidence
            ));
        }
        if self.report.trim().is_empty() {
            return Err("report is empty".to_string());
        }
        Ok(())
    }

    /// Confidence formatted the way the result panel shows it, e.g. `73.0%`.
    pub fn confidence_pct(&self) -> String {
        format!("{:.1}%", self.confidence * 100.0)
    }

    /// `(normal_share, pneumonia_share)` of the split bar, each in [0, 1].
    pub fn probability_split(&self) -> (f64, f64) {
        let confidence = self.confidence.clamp(0.0, 1.0);
        match self.diagnosis {
            Diagnosis::Normal => (confidence, 1.0 - confidence),
            Diagnosis::Pneumonia => (1.0 - confidence, confidence),
        }
    }
}

/// An image held in memory by the diagnosis screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    bytes: Vec<u8>,
    media_type: String,
    name: Option<String>,
}

impl UploadedImage {
    pub fn new(bytes: Vec<u8>, media_type: &str) -> Result<Self, String> {
        if bytes.is_empty() {
            return Err("image payload is empty".to_string());
        }
        let media_type = media_type.trim().to_ascii_lowercase();
        let media_type = if media_type == "image/jpg" {
            "image/jpeg".to_string()
        } else {
            media_type
        };
        if !RECOGNIZED_IMAGE_TYPES.contains(&media_type.as_str()) {
            return Err(format!("unsupported image media type '{media_type}'"));
        }
        Ok(Self {
            bytes,
            media_type,
            name: None,
        })
    }

    pub fn from_data_uri(uri: &str) -> Result<Self, String> {
        let (media_type, payload) = split_data_uri(uri)?;
        let bytes = BASE64
            .decode(payload.as_bytes())
            .map_err(|err| format!("invalid base64 image payload: {err}"))?;
        Self::new(bytes, media_type)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn base64_payload(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64_payload())
    }
}

/// Image bytes returned by the generation mode of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    bytes: Vec<u8>,
    media_type: String,
    prompt: String,
}

impl GeneratedImage {
    pub fn new(bytes: Vec<u8>, media_type: Option<&str>, prompt: impl Into<String>) -> Result<Self, String> {
        if bytes.is_empty() {
            return Err("generated image payload is empty".to_string());
        }
        let media_type = media_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("image/png")
            .to_ascii_lowercase();
        Ok(Self {
            bytes,
            media_type,
            prompt: prompt.into(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The full prompt sent to the service, style directive included.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn file_extension(&self) -> &'static str {
        match self.media_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }

    pub fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.media_type,
            BASE64.encode(&self.bytes)
        )
    }
}

fn split_data_uri(uri: &str) -> Result<(&str, &str), String> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| "data URI must start with 'data:'".to_string())?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URI has no payload".to_string())?;
    let media_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| "data URI is not base64 encoded".to_string())?;
    Ok((media_type, payload))
}
