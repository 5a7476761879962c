use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewState {
    #[default]
    Overview,
    Diagnosis,
    Generation,
    Experiments,
}

impl ViewState {
    /// Sidebar order.
    pub const ALL: [ViewState; 4] = [
        ViewState::Overview,
        ViewState::Diagnosis,
        ViewState::Generation,
        ViewState::Experiments,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ViewState::Overview => "overview",
            ViewState::Diagnosis => "diagnosis",
            ViewState::Generation => "generation",
            ViewState::Experiments => "experiments",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ViewState::Overview => "Overview",
            ViewState::Diagnosis => "Diagnosis Lab",
            ViewState::Generation => "Data Generator",
            ViewState::Experiments => "Experiments",
        }
    }

    /// Accepts keys, labels, 1-based menu numbers and a few aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "overview" | "dashboard" | "1" => Some(ViewState::Overview),
            "diagnosis" | "diagnosis lab" | "lab" | "2" => Some(ViewState::Diagnosis),
            "generation" | "generator" | "data generator" | "3" => Some(ViewState::Generation),
            "experiments" | "4" => Some(ViewState::Experiments),
            _ => None,
        }
    }
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub index: usize,
    pub view: ViewState,
    pub active: bool,
}

/// Holds the single active screen. Selection has no guards and no history.
#[derive(Debug, Clone, Default)]
pub struct ViewController {
    active: ViewState,
}

impl ViewController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> ViewState {
        self.active
    }

    /// Makes `view` active and returns the view it replaced.
    pub fn select(&mut self, view: ViewState) -> ViewState {
        std::mem::replace(&mut self.active, view)
    }

    pub fn menu(&self) -> Vec<MenuEntry> {
        ViewState::ALL
            .into_iter()
            .enumerate()
            .map(|(idx, view)| MenuEntry {
                index: idx + 1,
                view,
                active: view == self.active,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{ViewController, ViewState};

    #[test]
    fn controller_starts_on_overview() {
        let controller = ViewController::new();
        assert_eq!(controller.active(), ViewState::Overview);
        let active: Vec<ViewState> = controller
            .menu()
            .into_iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.view)
            .collect();
        assert_eq!(active, vec![ViewState::Overview]);
    }

    #[test]
    fn selection_replaces_active_view_from_any_state() {
        let mut controller = ViewController::new();
        for from in ViewState::ALL {
            for to in ViewState::ALL {
                controller.select(from);
                let previous = controller.select(to);
                assert_eq!(previous, from);
                assert_eq!(controller.active(), to);
                assert_eq!(controller.menu().iter().filter(|entry| entry.active).count(), 1);
            }
        }
    }

    #[test]
    fn repeated_selection_is_idempotent() {
        let mut controller = ViewController::new();
        controller.select(ViewState::Generation);
        let previous = controller.select(ViewState::Generation);
        assert_eq!(previous, ViewState::Generation);
        assert_eq!(controller.active(), ViewState::Generation);
    }

    #[test]
    fn parse_accepts_keys_labels_numbers_and_aliases() {
        assert_eq!(ViewState::parse("dashboard"), Some(ViewState::Overview));
        assert_eq!(ViewState::parse("Diagnosis Lab"), Some(ViewState::Diagnosis));
        assert_eq!(ViewState::parse("data-generator"), Some(ViewState::Generation));
        assert_eq!(ViewState::parse("generator"), Some(ViewState::Generation));
        assert_eq!(ViewState::parse("4"), Some(ViewState::Experiments));
        assert_eq!(ViewState::parse("settings"), None);
        for view in ViewState::ALL {
            assert_eq!(ViewState::parse(view.key()), Some(view));
            assert_eq!(ViewState::parse(view.label()), Some(view));
        }
    }

    #[test]
    fn menu_follows_sidebar_order() {
        let labels: Vec<&str> = ViewController::new()
            .menu()
            .iter()
            .map(|entry| entry.view.label())
            .collect();
        assert_eq!(
            labels,
            vec!["Overview", "Diagnosis Lab", "Data Generator", "Experiments"]
        );
    }
}
