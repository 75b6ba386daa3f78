//! Prompt templates and per-task model selection.
//!
//! Both lookups use the same precedence: organization override, then the
//! global row, then a built-in fallback. Results are cached in an injected
//! [`TtlCache`].

pub mod defaults;
pub mod render;

use std::sync::Arc;

use uuid::Uuid;

use crate::cache::TtlCache;
use crate::error::StageError;
use crate::generator::{GenerationRequest, TextGenerator};
use crate::store::ContentStore;

pub use render::{TemplateError, Vars, render, vars};

/// Generation tasks that can be assigned a model.
pub mod tasks {
    pub const TOPICS: &str = "topics";
    pub const VARIANTS: &str = "variants";
    pub const REVIEW: &str = "review";
    pub const SCHEDULE: &str = "schedule";
}

type ScopeKey = (String, Option<Uuid>);

/// Resolves prompt templates by name.
pub struct PromptLibrary {
    store: Arc<dyn ContentStore>,
    cache: TtlCache<ScopeKey, String>,
}

impl PromptLibrary {
    pub fn new(store: Arc<dyn ContentStore>, cache: TtlCache<ScopeKey, String>) -> Self {
        Self { store, cache }
    }

    /// Template body for `name` as seen by `organization_id`.
    pub async fn template(
        &self,
        name: &str,
        organization_id: Option<Uuid>,
    ) -> Result<String, StageError> {
        let key = (name.to_string(), organization_id);
        if let Some(body) = self.cache.get(&key) {
            return Ok(body);
        }

        let mut body = None;
        if organization_id.is_some() {
            body = self
                .store
                .get_template(name, organization_id)
                .await?
                .map(|t| t.body);
        }
        if body.is_none() {
            body = self.store.get_template(name, None).await?.map(|t| t.body);
        }
        let body = body
            .or_else(|| defaults::builtin(name))
            .ok_or_else(|| {
                StageError::MalformedResponse(TemplateError::UnknownTemplate(name.into()).to_string())
            })?;

        self.cache.insert(key, body.clone());
        Ok(body)
    }

    /// Fetch and render `name` with `vars`.
    pub async fn render(
        &self,
        name: &str,
        organization_id: Option<Uuid>,
        vars: &Vars,
    ) -> Result<String, StageError> {
        let body = self.template(name, organization_id).await?;
        render(name, &body, vars).map_err(|e| StageError::MalformedResponse(e.to_string()))
    }

    /// Forget the cached body for one scope, e.g. after an edit.
    pub fn invalidate(&self, name: &str, organization_id: Option<Uuid>) {
        self.cache.invalidate(&(name.to_string(), organization_id));
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Resolves the model identifier for a generation task.
pub struct ModelResolver {
    store: Arc<dyn ContentStore>,
    cache: TtlCache<ScopeKey, String>,
    default_model: String,
}

impl ModelResolver {
    pub fn new(
        store: Arc<dyn ContentStore>,
        cache: TtlCache<ScopeKey, String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            default_model: default_model.into(),
        }
    }

    pub async fn model(
        &self,
        task_name: &str,
        organization_id: Option<Uuid>,
    ) -> Result<String, StageError> {
        let key = (task_name.to_string(), organization_id);
        if let Some(model) = self.cache.get(&key) {
            return Ok(model);
        }

        let mut model = None;
        if organization_id.is_some() {
            model = self
                .store
                .get_model_assignment(task_name, organization_id)
                .await?
                .map(|m| m.model);
        }
        if model.is_none() {
            model = self
                .store
                .get_model_assignment(task_name, None)
                .await?
                .map(|m| m.model);
        }
        let model = model.unwrap_or_else(|| self.default_model.clone());

        self.cache.insert(key, model.clone());
        Ok(model)
    }

    pub fn invalidate(&self, task_name: &str, organization_id: Option<Uuid>) {
        self.cache.invalidate(&(task_name.to_string(), organization_id));
    }
}

/// Output register requested from the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// JSON or otherwise machine-read output; low temperature.
    Structured,
    Creative,
}

/// Renders a template, resolves the task's model and calls the generator.
pub struct PromptRunner {
    generator: Arc<dyn TextGenerator>,
    library: PromptLibrary,
    models: ModelResolver,
}

impl PromptRunner {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        library: PromptLibrary,
        models: ModelResolver,
    ) -> Self {
        Self {
            generator,
            library,
            models,
        }
    }

    pub fn generator(&self) -> &Arc<dyn TextGenerator> {
        &self.generator
    }

    pub fn library(&self) -> &PromptLibrary {
        &self.library
    }

    pub fn models(&self) -> &ModelResolver {
        &self.models
    }

    /// Render `template` with `vars` and send it for `task`.
    pub async fn run(
        &self,
        template: &str,
        task: &str,
        organization_id: Option<Uuid>,
        vars: &Vars,
        register: Register,
    ) -> Result<String, StageError> {
        let prompt = self.library.render(template, organization_id, vars).await?;
        let model = self.models.model(task, organization_id).await?;
        let request = match register {
            Register::Structured => GenerationRequest::structured(prompt, model),
            Register::Creative => GenerationRequest::creative(prompt, model),
        };
        Ok(self.generator.generate(&request).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;

    fn cache() -> TtlCache<ScopeKey, String> {
        TtlCache::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn org_override_beats_global_beats_builtin() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        let library = PromptLibrary::new(store.clone(), cache());

        let builtin = library
            .template(defaults::SCHEDULE, Some(org))
            .await
            .unwrap();
        assert!(builtin.contains("publication planner"));

        store.upsert_template(defaults::SCHEDULE, None, "global").await;
        library.invalidate_all();
        assert_eq!(
            library.template(defaults::SCHEDULE, Some(org)).await.unwrap(),
            "global"
        );

        store.upsert_template(defaults::SCHEDULE, Some(org), "mine").await;
        library.invalidate(defaults::SCHEDULE, Some(org));
        assert_eq!(
            library.template(defaults::SCHEDULE, Some(org)).await.unwrap(),
            "mine"
        );
        assert_eq!(
            library.template(defaults::SCHEDULE, None).await.unwrap(),
            "global"
        );
    }

    #[tokio::test]
    async fn cached_until_invalidated() {
        let store = Arc::new(MemoryStore::new());
        let library = PromptLibrary::new(store.clone(), cache());
        store.upsert_template("custom", None, "v1").await;
        assert_eq!(library.template("custom", None).await.unwrap(), "v1");

        store.upsert_template("custom", None, "v2").await;
        assert_eq!(library.template("custom", None).await.unwrap(), "v1");

        library.invalidate("custom", None);
        assert_eq!(library.template("custom", None).await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn unknown_template_fails() {
        let library = PromptLibrary::new(Arc::new(MemoryStore::new()), cache());
        assert!(library.template("does_not_exist", None).await.is_err());
    }

    #[tokio::test]
    async fn render_reports_missing_placeholder() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_template("greet", None, "Hello {who}").await;
        let library = PromptLibrary::new(store, cache());
        let err = library.render("greet", None, &Vars::new()).await.unwrap_err();
        assert!(matches!(err, StageError::MalformedResponse(_)));
        let ok = library
            .render("greet", None, &vars([("who", "Acme")]))
            .await
            .unwrap();
        assert_eq!(ok, "Hello Acme");
    }

    #[tokio::test]
    async fn model_precedence_and_default() {
        let store = Arc::new(MemoryStore::new());
        let org = Uuid::new_v4();
        let resolver = ModelResolver::new(store.clone(), TtlCache::new(Duration::ZERO), "base");

        assert_eq!(resolver.model(tasks::REVIEW, Some(org)).await.unwrap(), "base");
        store
            .upsert_model_assignment(tasks::REVIEW, None, "anthropic/big")
            .await;
        assert_eq!(
            resolver.model(tasks::REVIEW, Some(org)).await.unwrap(),
            "anthropic/big"
        );
        store
            .upsert_model_assignment(tasks::REVIEW, Some(org), "claude-cli/small")
            .await;
        assert_eq!(
            resolver.model(tasks::REVIEW, Some(org)).await.unwrap(),
            "claude-cli/small"
        );
    }
}
