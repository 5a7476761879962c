#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "view",
        action: "set_view",
    },
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
    },
    CommandSpec {
        command: "preset",
        action: "apply_preset",
    },
];

/// Sidebar shortcuts; each maps to `set_view` with the given view key.
pub(crate) const VIEW_SHORTCUTS: &[(&str, &str)] = &[
    ("overview", "overview"),
    ("dashboard", "overview"),
    ("diagnosis", "diagnosis"),
    ("lab", "diagnosis"),
    ("generator", "generation"),
    ("generation", "generation"),
    ("experiments", "experiments"),
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "load",
        action: "load_image",
    },
    CommandSpec {
        command: "save",
        action: "save_image",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "menu",
        action: "menu",
    },
    CommandSpec {
        command: "run",
        action: "run_analysis",
    },
    CommandSpec {
        command: "clear",
        action: "clear_image",
    },
    CommandSpec {
        command: "generate",
        action: "generate_image",
    },
    CommandSpec {
        command: "wait",
        action: "wait",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/menu",
    "/view <name|1-4>",
    "/overview",
    "/diagnosis",
    "/generator",
    "/experiments",
    "/load <path>",
    "/run",
    "/clear",
    "/prompt <text>",
    "/preset <pneumonia|normal|viral>",
    "/generate",
    "/save [path]",
    "/wait",
    "/status",
    "/quit",
];
