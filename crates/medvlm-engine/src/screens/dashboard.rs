use std::fmt::Write as _;

use medvlm_contracts::datasets::{
    ARCHITECTURE, DATASET_NOTE, PROMPT_ABLATION, ROBUSTNESS, SCALING_LAW, STAT_CARDS,
    SYSTEM_STATUS,
};
use medvlm_contracts::views::ViewState;

use super::{bar, RULE};

/// Renders the static research dashboard. Experiments reuses the overview
/// content under its own heading.
pub fn render_dashboard(view: ViewState) -> String {
    let mut out = String::new();
    let title = match view {
        ViewState::Experiments => "Experiments",
        _ => "Research Dashboard",
    };
    let _ = writeln!(out, "{title}    [System Status: {SYSTEM_STATUS}]");
    let _ = writeln!(out, "{DATASET_NOTE}");
    let _ = writeln!(out, "{RULE}");

    for card in STAT_CARDS {
        let _ = writeln!(out, "{:<18} {:>7}   {}", card.title, card.value, card.subtext);
    }
    let _ = writeln!(out, "{RULE}");

    let _ = writeln!(out, "Few-Shot Scaling Law (AUC)");
    let _ = writeln!(
        out,
        "  {:>6}  {:>8}  {:>10}  {:>6}",
        "shots", "scratch", "pretrained", "ours"
    );
    for point in SCALING_LAW {
        let _ = writeln!(
            out,
            "  {:>6}  {:>8.2}  {:>10.2}  {:>6.2}",
            point.shots, point.scratch, point.pretrained, point.ours
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Prompt Engineering Ablation (AUC)");
    for ablation in PROMPT_ABLATION {
        let _ = writeln!(
            out,
            "  {:<16} {} {:.4}",
            ablation.name,
            bar(ablation.auc, 24),
            ablation.auc
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Robustness (AUC vs Gaussian noise)");
    for point in ROBUSTNESS {
        let _ = writeln!(out, "  noise {:.1}  {} {:.2}", point.noise, bar(point.auc, 24), point.auc);
    }
    let _ = writeln!(out, "{RULE}");

    let _ = writeln!(out, "Model Architecture");
    let _ = writeln!(out, "  {}", ARCHITECTURE.summary);
    let _ = writeln!(
        out,
        "  Backbone: {}    CLIP Model: {}",
        ARCHITECTURE.backbone, ARCHITECTURE.clip_model
    );
    out
}
