//! Name-addressed models, tools, prompts, partials, and schemas.

use crate::error::PromptError;
use crate::model::{Model, ModelLookup};
use crate::prompt::source::{self, PromptSource};
use crate::prompt::{PromptBuilder, PromptDefinition, prompt_key};
use crate::schema::Schema;
use crate::schema::picoschema::{self, SchemaResolver};
use crate::template::{Partials, TemplateCache};
use crate::tools::{Tool, ToolLookup, ToolSet};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared lookups for prompts and the generation loop.
///
/// Populate it during startup, then share it by reference; lookups take
/// `&self`.
#[derive(Default)]
pub struct Registry {
    models: HashMap<String, Arc<dyn Model>>,
    default_model: Option<String>,
    tools: ToolSet,
    prompts: HashMap<String, Arc<PromptDefinition>>,
    partials: Partials,
    schemas: HashMap<String, Schema>,
    templates: TemplateCache,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut models: Vec<&String> = self.models.keys().collect();
        models.sort();
        let mut prompts: Vec<&String> = self.prompts.keys().collect();
        prompts.sort();
        f.debug_struct("Registry")
            .field("models", &models)
            .field("tools", &self.tools)
            .field("prompts", &prompts)
            .field("partials", &self.partials.len())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under its own name.
    pub fn register_model(&mut self, model: impl Model + 'static) {
        self.register_model_arc(Arc::new(model));
    }

    pub fn register_model_arc(&mut self, model: Arc<dyn Model>) {
        debug!(model = model.name(), "registered model");
        self.models.insert(model.name().to_string(), model);
    }

    /// Model name applied to prompts defined without one.
    pub fn set_default_model(&mut self, name: impl Into<String>) {
        self.default_model = Some(name.into());
    }

    pub fn model(&self, name: &str) -> Option<&dyn Model> {
        self.models.get(name).map(|m| m.as_ref())
    }

    pub fn register_tool(&mut self, tool: impl Tool + 'static) {
        self.tools.register(tool);
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Register a named schema for `field: Name` references. The value is
    /// picoschema or JSON Schema; earlier registrations can be referenced.
    pub fn register_schema(&mut self, name: impl Into<String>, schema: &Value) -> Result<(), PromptError> {
        let compiled = picoschema::compile_with(schema, &*self)?;
        self.schemas.insert(name.into(), compiled);
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn register_partial(&mut self, name: impl Into<String>, source: &str) -> Result<(), PromptError> {
        let template = self.templates.get_or_compile(source)?;
        self.partials.insert(name, template);
        Ok(())
    }

    pub fn partials(&self) -> &Partials {
        &self.partials
    }

    /// Build and store a prompt. Templates go through the registry's cache
    /// and schema names resolve against registered schemas.
    pub fn define_prompt(&mut self, builder: PromptBuilder) -> Result<Arc<PromptDefinition>, PromptError> {
        let builder = match &self.default_model {
            Some(name) if !builder.has_model() => builder.model_name(name.clone()),
            _ => builder,
        };
        let prompt = Arc::new(builder.build_with(Some(&self.templates), &*self)?);
        debug!(prompt = %prompt.key(), "defined prompt");
        self.prompts.insert(prompt.key(), Arc::clone(&prompt));
        Ok(prompt)
    }

    pub fn prompt(&self, name: &str, variant: Option<&str>) -> Option<Arc<PromptDefinition>> {
        self.prompts.get(&prompt_key(name, variant)).cloned()
    }

    /// Register every partial and prompt under `dir`. Partials are
    /// registered first so prompts may use them. Returns the number of
    /// prompts defined.
    pub fn load_prompt_dir(&mut self, dir: &Path) -> Result<usize, PromptError> {
        let loaded = source::load_prompt_dir(dir)?;
        for (name, text) in &loaded.partials {
            self.register_partial(name.clone(), text)?;
        }
        let count = loaded.prompts.len();
        for prompt in loaded.prompts {
            self.define_prompt(PromptSource::into_builder(prompt))?;
        }
        info!(
            "Loaded {count} prompt(s) and {} partial(s) from {}",
            loaded.partials.len(),
            dir.display()
        );
        Ok(count)
    }
}

impl ModelLookup for Registry {
    fn find_model(&self, name: &str) -> Option<&dyn Model> {
        self.model(name)
    }
}

impl ToolLookup for Registry {
    fn find_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name)
    }
}

impl SchemaResolver for Registry {
    fn resolve_schema(&self, name: &str) -> Option<Schema> {
        self.schemas.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FnModel, ModelResponse};
    use crate::prompt::RenderOptions;
    use crate::{GenerationRequest, Message};
    use serde_json::json;

    fn echo() -> FnModel {
        FnModel::new("echo", |_req: GenerationRequest| async move {
            Ok(ModelResponse::new(Message::model("ok")))
        })
    }

    #[test]
    fn named_schemas_resolve_in_prompts() {
        let mut registry = Registry::new();
        registry.register_model(echo());
        registry
            .register_schema("Person", &json!({"name": "string", "age?": "integer"}))
            .unwrap();
        let prompt = registry
            .define_prompt(
                PromptDefinition::builder("bio")
                    .model_name("echo")
                    .input_schema(json!({"subject": "Person"}))
                    .template("Write about {{subject.name}}."),
            )
            .unwrap();
        let subject = prompt.input_schema().unwrap().property("subject").unwrap();
        assert_eq!(subject.schema.required(), ["name"]);
        assert!(registry.find_model("echo").is_some());
        assert!(registry.prompt("bio", None).is_some());
    }

    #[test]
    fn default_model_fills_in() {
        let mut registry = Registry::new();
        registry.set_default_model("echo");
        let prompt = registry
            .define_prompt(PromptDefinition::builder("p").template("hi"))
            .unwrap();
        assert!(matches!(prompt.model(), crate::prompt::ModelSelector::Name(n) if n == "echo"));
    }

    #[test]
    fn partials_render_through_registry() {
        let mut registry = Registry::new();
        registry.register_partial("sig", "-- {{author}}").unwrap();
        let prompt = registry
            .define_prompt(
                PromptDefinition::builder("letter")
                    .model_name("echo")
                    .template("Dear {{to}}, {{> sig}}"),
            )
            .unwrap();
        let options = RenderOptions {
            partials: Some(registry.partials()),
            ..Default::default()
        };
        let messages = prompt
            .render(json!({"to": "Ada", "author": "Bob"}), &options)
            .unwrap();
        assert_eq!(messages[0].text(), "Dear Ada, -- Bob");
    }
}
