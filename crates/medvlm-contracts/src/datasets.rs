//! Reference numbers shown on the overview dashboard. Fixed sample data.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatCard {
    pub title: &'static str,
    pub value: &'static str,
    pub subtext: &'static str,
}

/// Few-shot AUC for training from scratch, from a generic pretrained
/// backbone, and for the linear-probe model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingLawPoint {
    pub shots: u32,
    pub scratch: f64,
    pub pretrained: f64,
    pub ours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustnessPoint {
    pub noise: f64,
    pub auc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AblationBar {
    pub name: &'static str,
    pub auc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchitectureNote {
    pub summary: &'static str,
    pub backbone: &'static str,
    pub clip_model: &'static str,
}

pub const DATASET_NOTE: &str =
    "Performance metrics based on 5216 training / 624 test images (Pneumonia MNIST).";

pub const SYSTEM_STATUS: &str = "Operational";

pub const STAT_CARDS: &[StatCard] = &[
    StatCard {
        title: "Diagnostic AUC",
        value: "0.95",
        subtext: "Ours (Linear Probe, 500-shot)",
    },
    StatCard {
        title: "Data Efficiency",
        value: "+15%",
        subtext: "Improvement over Baseline",
    },
    StatCard {
        title: "Inference Speed",
        value: "184ms",
        subtext: "Average latency per scan",
    },
    StatCard {
        title: "Robustness",
        value: "0.85",
        subtext: "AUC at 0.5 Gaussian Noise",
    },
];

pub const SCALING_LAW: &[ScalingLawPoint] = &[
    ScalingLawPoint {
        shots: 20,
        scratch: 0.55,
        pretrained: 0.65,
        ours: 0.78,
    },
    ScalingLawPoint {
        shots: 50,
        scratch: 0.62,
        pretrained: 0.72,
        ours: 0.82,
    },
    ScalingLawPoint {
        shots: 100,
        scratch: 0.70,
        pretrained: 0.79,
        ours: 0.86,
    },
    ScalingLawPoint {
        shots: 200,
        scratch: 0.75,
        pretrained: 0.85,
        ours: 0.89,
    },
    ScalingLawPoint {
        shots: 500,
        scratch: 0.81,
        pretrained: 0.92,
        ours: 0.95,
    },
];

pub const ROBUSTNESS: &[RobustnessPoint] = &[
    RobustnessPoint {
        noise: 0.0,
        auc: 0.95,
    },
    RobustnessPoint {
        noise: 0.1,
        auc: 0.94,
    },
    RobustnessPoint {
        noise: 0.3,
        auc: 0.90,
    },
    RobustnessPoint {
        noise: 0.5,
        auc: 0.85,
    },
    RobustnessPoint {
        noise: 0.8,
        auc: 0.65,
    },
];

pub const PROMPT_ABLATION: &[AblationBar] = &[
    AblationBar {
        name: "Naive",
        auc: 0.4131,
    },
    AblationBar {
        name: "Medical Prompt",
        auc: 0.4565,
    },
    AblationBar {
        name: "Ours (Linear)",
        auc: 0.9049,
    },
];

pub const ARCHITECTURE: ArchitectureNote = ArchitectureNote {
    summary: "Hybrid pipeline: CLIP for zero-shot recognition, Stable Diffusion for \
              data augmentation, BLIP for automated medical reporting.",
    backbone: "ResNet-18",
    clip_model: "ViT-B/32",
};
