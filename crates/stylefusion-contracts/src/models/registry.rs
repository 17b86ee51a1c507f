use indexmap::IndexMap;

pub const TRY_ON_CAPABILITY: &str = "try_on";
pub const DEFAULT_TRY_ON_MODEL: &str = "gemini-2.5-flash-image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub label: String,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known image models in preference order; the first entry for a capability
/// is its default.
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
        self.models.get(name.trim().trim_start_matches("models/"))
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], label: &str| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                label: label.to_string(),
            },
        );
    };

    insert(
        DEFAULT_TRY_ON_MODEL,
        "gemini",
        &[TRY_ON_CAPABILITY, "image"],
        "Gemini 2.5 Flash Image",
    );
    insert(
        "gemini-2.5-flash-image-preview",
        "gemini",
        &[TRY_ON_CAPABILITY, "image"],
        "Gemini 2.5 Flash Image (preview)",
    );
    insert(
        "gemini-3-pro-image-preview",
        "gemini",
        &[TRY_ON_CAPABILITY, "image"],
        "Gemini 3 Pro Image (preview)",
    );
    insert(
        "imagen-4",
        "imagen",
        &["image"],
        "Imagen 4 (text-to-image only)",
    );
    insert(
        "dryrun-tryon-1",
        "dryrun",
        &[TRY_ON_CAPABILITY],
        "Offline overlay preview",
    );

    map
}
