//! Per-screen interaction state. Screens never call the network themselves:
//! they hand out a ticket when a call may start and take the outcome back.

pub mod dashboard;
pub mod diagnosis;
pub mod generator;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRefusal {
    /// A call from this screen is still outstanding.
    Busy,
    NoImage,
    EmptyPrompt,
}

impl fmt::Display for StartRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StartRefusal::Busy => "a request is already in progress",
            StartRefusal::NoImage => "load an image first",
            StartRefusal::EmptyPrompt => "the prompt is empty",
        })
    }
}

/// What happened to an outcome handed back to a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// The call finished after its input was replaced or cleared.
    Stale,
    /// The ticket does not match the call in flight.
    Ignored,
}

pub(crate) const RULE: &str = "────────────────────────────────────────────────────────";

pub(crate) fn bar(share: f64, width: usize) -> String {
    let filled = (share.clamp(0.0, 1.0) * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}
