//! Named generator adapters with `provider/model` routing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{GenerationError, GenerationRequest, TextGenerator};

/// Registered generators keyed by name, plus the provider used for bare
/// model identifiers.
///
/// The registry is itself a [`TextGenerator`]: `generate` strips the
/// provider prefix from the request's model and forwards to the adapter.
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn TextGenerator>>,
    default_provider: Option<String>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under [`TextGenerator::name`]. The first
    /// registered adapter becomes the default provider. Returns the
    /// adapter previously registered under that name.
    pub fn register(&mut self, generator: Arc<dyn TextGenerator>) -> Option<Arc<dyn TextGenerator>> {
        let name = generator.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.generators.insert(name, generator)
    }

    /// Choose the provider used for model identifiers without a prefix.
    pub fn set_default(&mut self, name: &str) -> bool {
        if self.generators.contains_key(name) {
            self.default_provider = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TextGenerator>> {
        self.generators.get(name)
    }

    /// Names of all registered adapters, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Split `model` into an adapter and the model name it should receive.
    ///
    /// `provider/model` selects `provider` when it is registered; anything
    /// else goes to the default provider unchanged.
    pub fn resolve<'m>(
        &self,
        model: &'m str,
    ) -> Result<(&Arc<dyn TextGenerator>, &'m str), GenerationError> {
        if let Some((provider, rest)) = model.split_once('/') {
            if let Some(generator) = self.generators.get(provider) {
                return Ok((generator, rest));
            }
        }

        let default = self
            .default_provider
            .as_deref()
            .and_then(|name| self.generators.get(name))
            .ok_or_else(|| GenerationError::Unavailable("no generator registered".to_string()))?;
        Ok((default, model))
    }
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("generators", &self.list())
            .field("default_provider", &self.default_provider)
            .finish()
    }
}

#[async_trait]
impl TextGenerator for GeneratorRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let (generator, model) = self.resolve(&request.model)?;
        let routed = GenerationRequest {
            model: model.to_string(),
            ..request.clone()
        };
        tracing::debug!(provider = generator.name(), model, "routing generation request");
        generator.generate(&routed).await
    }
}
