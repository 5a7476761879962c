use std::fmt;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Structured classification + report from an image.
    Analysis,
    /// Image output from a text prompt.
    ImageGeneration,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Analysis => "analysis",
            Capability::ImageGeneration => "image",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub display_name: String,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Known models, in preference order per capability.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, display_name: &str, capabilities: &[Capability]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: "gemini".to_string(),
                display_name: display_name.to_string(),
                capabilities: capabilities.to_vec(),
            },
        );
    };

    insert("gemini-2.5-flash", "Gemini 2.5 Flash", &[Capability::Analysis]);
    insert("gemini-2.5-pro", "Gemini 2.5 Pro", &[Capability::Analysis]);
    insert("gemini-2.0-flash", "Gemini 2.0 Flash", &[Capability::Analysis]);
    insert(
        "gemini-2.5-flash-image",
        "Gemini 2.5 Flash Image",
        &[Capability::ImageGeneration],
    );
    insert(
        "gemini-3-pro-image-preview",
        "Gemini 3 Pro Image",
        &[Capability::ImageGeneration],
    );

    map
}
