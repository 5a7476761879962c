use std::fmt::Write as _;

use medvlm_contracts::analysis::{AnalysisResult, Diagnosis, UploadedImage};

use super::{bar, Completion, StartRefusal, RULE};
use crate::error::{EngineError, ErrorKind};
use crate::imaging::image_dimensions;

pub const ANALYSIS_FAILED_MESSAGE: &str =
    "Analysis failed. Please try again or check your API key.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisPhase {
    Empty,
    Loaded,
    Analyzing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub enum DiagnosisOutcome {
    Result(AnalysisResult),
    Error(EngineError),
}

/// Proof that the screen agreed to start a call, carrying the image to send.
#[derive(Debug, Clone)]
pub struct AnalysisTicket {
    id: u64,
    epoch: u64,
    image: UploadedImage,
}

impl AnalysisTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn image(&self) -> &UploadedImage {
        &self.image
    }
}

#[derive(Debug, Default)]
pub struct DiagnosisLab {
    image: Option<UploadedImage>,
    dimensions: Option<(u32, u32)>,
    in_flight: Option<u64>,
    outcome: Option<DiagnosisOutcome>,
    next_ticket: u64,
    // Bumped whenever the image is replaced or removed.
    epoch: u64,
}

impl DiagnosisLab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> DiagnosisPhase {
        if self.in_flight.is_some() {
            return DiagnosisPhase::Analyzing;
        }
        match (&self.outcome, &self.image) {
            (Some(DiagnosisOutcome::Result(_)), _) => DiagnosisPhase::Succeeded,
            (Some(DiagnosisOutcome::Error(_)), _) => DiagnosisPhase::Failed,
            (None, Some(_)) => DiagnosisPhase::Loaded,
            (None, None) => DiagnosisPhase::Empty,
        }
    }

    pub fn image(&self) -> Option<&UploadedImage> {
        self.image.as_ref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self.outcome.as_ref()? {
            DiagnosisOutcome::Result(result) => Some(result),
            DiagnosisOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self.outcome.as_ref()? {
            DiagnosisOutcome::Error(err) => Some(err),
            DiagnosisOutcome::Result(_) => None,
        }
    }

    pub fn can_run(&self) -> bool {
        self.image.is_some() && self.in_flight.is_none()
    }

    /// Replaces the image and drops any previous result or error. A call
    /// still in flight keeps the screen busy, but its outcome is discarded.
    pub fn load(&mut self, image: UploadedImage) {
        self.dimensions = image_dimensions(image.bytes());
        self.image = Some(image);
        self.outcome = None;
        self.epoch += 1;
    }

    /// Removes image, result and error together.
    pub fn clear(&mut self) {
        self.image = None;
        self.dimensions = None;
        self.outcome = None;
        self.epoch += 1;
    }

    pub fn begin(&mut self) -> Result<AnalysisTicket, StartRefusal> {
        if self.in_flight.is_some() {
            return Err(StartRefusal::Busy);
        }
        let Some(image) = self.image.clone() else {
            return Err(StartRefusal::NoImage);
        };
        self.next_ticket += 1;
        self.in_flight = Some(self.next_ticket);
        self.outcome = None;
        Ok(AnalysisTicket {
            id: self.next_ticket,
            epoch: self.epoch,
            image,
        })
    }

    pub fn complete(
        &mut self,
        ticket: &AnalysisTicket,
        outcome: Result<AnalysisResult, EngineError>,
    ) -> Completion {
        if self.in_flight != Some(ticket.id) {
            return Completion::Ignored;
        }
        self.in_flight = None;
        if ticket.epoch != self.epoch {
            return Completion::Stale;
        }
        self.outcome = Some(match outcome {
            Ok(result) => DiagnosisOutcome::Result(result),
            Err(err) => DiagnosisOutcome::Error(err),
        });
        Completion::Applied
    }

    pub fn render(&self, model_label: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Diagnosis Lab");
        let _ = writeln!(
            out,
            "Upload a chest X-ray for zero-shot classification and report generation."
        );
        let _ = writeln!(out, "{RULE}");

        match self.image.as_ref() {
            Some(image) => {
                let name = image.name().unwrap_or("uploaded image");
                let dims = self
                    .dimensions
                    .map(|(width, height)| format!(", {width}x{height}"))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "Image:  {name} ({}{dims}, {} bytes)",
                    image.media_type(),
                    image.bytes().len()
                );
            }
            None => {
                let _ = writeln!(out, "Image:  none. Upload a chest X-ray with /load <path>.");
            }
        }
        let status = match self.phase() {
            DiagnosisPhase::Empty => "waiting for an image",
            DiagnosisPhase::Analyzing => "Analyzing...",
            _ => "ready (/run to start diagnosis, /clear to reset)",
        };
        let _ = writeln!(out, "Status: {status}");
        let _ = writeln!(out, "{RULE}");

        match self.outcome.as_ref() {
            None => {
                let _ = writeln!(out, "Analysis results will appear here.");
            }
            Some(DiagnosisOutcome::Error(err)) => render_error(&mut out, err),
            Some(DiagnosisOutcome::Result(result)) => render_result(&mut out, result, model_label),
        }
        out
    }
}

fn render_error(out: &mut String, err: &EngineError) {
    if err.kind() == ErrorKind::Configuration {
        let _ = writeln!(out, "Configuration error: {err}");
        return;
    }
    let _ = writeln!(out, "{ANALYSIS_FAILED_MESSAGE}");
    let _ = writeln!(out, "  {err}");
}

fn render_result(out: &mut String, result: &AnalysisResult, model_label: &str) {
    let marker = match result.diagnosis {
        Diagnosis::Pneumonia => "[!]",
        Diagnosis::Normal => "[ok]",
    };
    let _ = writeln!(
        out,
        "Prediction: {marker} {}    Confidence: {}",
        result.diagnosis,
        result.confidence_pct()
    );
    let (normal, pneumonia) = result.probability_split();
    let _ = writeln!(
        out,
        "Normal {}{} Pneumonia",
        bar(normal, 20),
        bar(pneumonia, 20).replace('█', "▓")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Generated Medical Report (BLIP-Style)");
    for line in result.report.lines() {
        let _ = writeln!(out, "  {line}");
    }
    if let Some(explanation) = result.heatmap_explanation.as_deref() {
        let _ = writeln!(out);
        let _ = writeln!(out, "AI Focus (Explainability)");
        let _ = writeln!(out, "  {explanation}");
    }
    let _ = writeln!(out);
    let latency = result
        .latency_ms
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_else(|| "n/a".to_string());
    let _ = writeln!(out, "Latency: {latency} | Model: MedVLM-v1 ({model_label} backend)");
}
