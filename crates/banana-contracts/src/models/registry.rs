use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::error::RegistryError;
use crate::session::resume::ResumePolicy;

/// Date the builtin price table was last checked against the vendor's list.
pub const PRICES_COLLECTED: &str = "2026-02-20";

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    pub name: String,
    pub model_id: String,
    pub family: String,
    pub max_input_images: usize,
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    /// Supported output sizes, base size first.
    pub sizes: Vec<String>,
    pub image_prices: IndexMap<String, f64>,
    pub resume_policy: ResumePolicy,
}

impl ModelDefinition {
    pub fn supports_size(&self, size: &str) -> bool {
        self.sizes.iter().any(|item| item == size)
    }

    pub fn base_size(&self) -> &str {
        self.sizes.first().map(String::as_str).unwrap_or("1K")
    }

    /// Per-image price for `size`, falling back to the base size for tags the
    /// table does not know. Only meant for estimates, never for validating a
    /// live request.
    pub fn image_price(&self, size: &str) -> f64 {
        self.image_prices
            .get(size)
            .or_else(|| self.image_prices.get(self.base_size()))
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelDefinition>,
    aliases: IndexMap<String, String>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDefinition>, aliases: IndexMap<String, String>) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|model| (model.name.clone(), model))
                .collect(),
            aliases,
        }
    }

    pub fn builtin() -> Self {
        Self::new(default_models(), default_aliases())
    }

    pub fn get(&self, canonical: &str) -> Option<&ModelDefinition> {
        self.models.get(canonical)
    }

    pub fn alias_target(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.is_alias(name) || self.models.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&ModelDefinition, RegistryError> {
        let canonical = self.alias_target(name).unwrap_or(name);
        self.models
            .get(canonical)
            .ok_or_else(|| RegistryError::UnknownModel {
                name: name.to_string(),
                valid: self.valid_names(),
            })
    }

    /// Aliases and canonical names, deduplicated and sorted.
    pub fn valid_names(&self) -> Vec<String> {
        self.aliases
            .keys()
            .chain(self.models.keys())
            .cloned()
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect()
    }

    /// Whether a session declared with `declared` may be continued with the
    /// canonical model `requested`. Aliases pass when their current target is
    /// in the same family, so an alias retargeted between releases keeps
    /// working.
    pub fn is_compatible(&self, declared: &str, requested: &str) -> bool {
        if declared == requested {
            return true;
        }
        let Some(target) = self.alias_target(declared) else {
            return false;
        };
        let requested_family = self
            .resolve(requested)
            .map(|model| model.family.as_str())
            .ok();
        let declared_family = self.get(target).map(|model| model.family.as_str());
        declared_family.is_some() && declared_family == requested_family
    }
}

fn default_aliases() -> IndexMap<String, String> {
    let mut aliases = IndexMap::new();
    aliases.insert("flash".to_string(), "flash-3.1".to_string());
    aliases.insert("pro".to_string(), "pro-3".to_string());
    aliases
}

fn default_models() -> Vec<ModelDefinition> {
    let mut models = Vec::new();

    let mut insert = |name: &str,
                      model_id: &str,
                      family: &str,
                      max_input_images: usize,
                      token_prices: (f64, f64),
                      image_prices: &[(&str, f64)],
                      resume_policy: ResumePolicy| {
        models.push(ModelDefinition {
            name: name.to_string(),
            model_id: model_id.to_string(),
            family: family.to_string(),
            max_input_images,
            input_per_mtok: token_prices.0,
            output_per_mtok: token_prices.1,
            sizes: image_prices
                .iter()
                .map(|(size, _)| (*size).to_string())
                .collect(),
            image_prices: image_prices
                .iter()
                .map(|(size, price)| ((*size).to_string(), *price))
                .collect(),
            resume_policy,
        });
    };

    insert(
        "flash-2.5",
        "gemini-2.5-flash-image",
        "flash",
        3,
        (0.30, 2.50),
        &[("1K", 0.039)],
        ResumePolicy::KeepAll,
    );
    insert(
        "flash-3.1",
        "gemini-3.1-flash-image-preview",
        "flash",
        14,
        (0.50, 3.00),
        &[("1K", 0.067), ("2K", 0.101), ("4K", 0.151)],
        ResumePolicy::SignedPartsOnly,
    );
    insert(
        "pro-3",
        "gemini-3-pro-image-preview",
        "pro",
        14,
        (2.00, 12.00),
        &[("1K", 0.134), ("2K", 0.134), ("4K", 0.24)],
        ResumePolicy::SignedPartsOnly,
    );

    models
}
