mod registry;

pub use registry::{ModelDefinition, ModelRegistry, PRICES_COLLECTED};
