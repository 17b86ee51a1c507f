mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DEFAULT_TRY_ON_MODEL, TRY_ON_CAPABILITY};
pub use selectors::{ModelSelection, ModelSelector};
