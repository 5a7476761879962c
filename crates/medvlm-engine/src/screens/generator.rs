use std::fmt::Write as _;

use medvlm_contracts::analysis::GeneratedImage;

use super::{Completion, StartRefusal, RULE};
use crate::error::EngineError;
use crate::imaging::image_dimensions;

pub const DEFAULT_PROMPT: &str = "pneumonia opacity in right lung, consolidation, hazy white patches";

/// Named prompt presets, in display order.
pub const GENERATOR_PRESETS: &[(&str, &str)] = &[
    ("pneumonia", "pneumonia opacity in right lung, consolidation"),
    ("normal", "normal healthy lungs, clear diaphragm, no opacity"),
    ("viral", "severe viral pneumonia, diffuse interstitial markings"),
];

pub fn preset_prompt(name: &str) -> Option<&'static str> {
    let wanted = name.trim();
    GENERATOR_PRESETS
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
        .map(|(_, prompt)| *prompt)
}

#[derive(Debug, Clone)]
pub struct GenerationTicket {
    id: u64,
    prompt: String,
}

impl GenerationTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[derive(Debug)]
pub struct Generator {
    prompt: String,
    in_flight: Option<u64>,
    next_ticket: u64,
    last_image: Option<GeneratedImage>,
    last_error: Option<EngineError>,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            in_flight: None,
            next_ticket: 0,
            last_image: None,
            last_error: None,
        }
    }
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    /// Overwrites the prompt with the named preset. Unknown names leave it alone.
    pub fn apply_preset(&mut self, name: &str) -> Option<&'static str> {
        let prompt = preset_prompt(name)?;
        self.prompt = prompt.to_string();
        Some(prompt)
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_image(&self) -> Option<&GeneratedImage> {
        self.last_image.as_ref()
    }

    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    pub fn begin(&mut self) -> Result<GenerationTicket, StartRefusal> {
        if self.in_flight.is_some() {
            return Err(StartRefusal::Busy);
        }
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(StartRefusal::EmptyPrompt);
        }
        let prompt = prompt.to_string();
        self.next_ticket += 1;
        self.in_flight = Some(self.next_ticket);
        self.last_error = None;
        Ok(GenerationTicket {
            id: self.next_ticket,
            prompt,
        })
    }

    /// A failure keeps whatever image was shown before.
    pub fn complete(
        &mut self,
        ticket: &GenerationTicket,
        outcome: Result<GeneratedImage, EngineError>,
    ) -> Completion {
        if self.in_flight != Some(ticket.id) {
            return Completion::Ignored;
        }
        self.in_flight = None;
        match outcome {
            Ok(image) => {
                self.last_image = Some(image);
                self.last_error = None;
            }
            Err(err) => self.last_error = Some(err),
        }
        Completion::Applied
    }

    pub fn render(&self, model_label: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Synthetic Data Generator");
        let _ = writeln!(
            out,
            "Generate high-fidelity chest X-rays to augment rare pathology datasets."
        );
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "Prompt: {}", self.prompt);
        let presets = GENERATOR_PRESETS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "Presets: {presets} (/preset <name>)");
        let _ = writeln!(out, "Engine: Stable Diffusion v1.5 ({model_label})");
        let status = if self.is_generating() {
            "Generating..."
        } else {
            "ready (/generate, then /save [path])"
        };
        let _ = writeln!(out, "Status: {status}");
        let _ = writeln!(out, "{RULE}");

        if let Some(err) = self.last_error.as_ref() {
            let _ = writeln!(out, "Generation failed: {err}");
        }
        match self.last_image.as_ref() {
            Some(image) => {
                let dims = image_dimensions(image.bytes())
                    .map(|(width, height)| format!("{width}x{height}, "))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "Last image: {} ({dims}{} bytes)",
                    image.media_type(),
                    image.bytes().len()
                );
                let _ = writeln!(out, "  prompt: {}", image.prompt());
            }
            None => {
                let _ = writeln!(out, "No image generated yet.");
            }
        }
        out
    }
}
