//! Prompt definitions.
//!
//! A [`PromptDefinition`] bundles a compiled template, compiled input and
//! output schemas, default variables, model selection, and tool names. It is
//! immutable once built and safe to share across concurrent renders.
//!
//! ```ignore
//! let prompt = PromptDefinition::builder("greeting")
//!     .variant("formal")
//!     .model_name("demo-model")
//!     .input_schema(json!({ "name": "string", "title?": "string" }))
//!     .template("{{role \"system\"}}Be polite.{{role \"user\"}}Greet {{title}} {{name}}.")
//!     .build()?;
//!
//! let messages = prompt.render(json!({ "name": "Ada" }), &RenderOptions::default())?;
//! ```

pub mod source;

use crate::error::PromptError;
use crate::messages::to_messages_with_history;
use crate::model::Model;
use crate::schema::picoschema::{self, NoSchemas, SchemaResolver};
use crate::schema::{Schema, shape_name};
use crate::template::{CompiledTemplate, Partials, RenderContext, TemplateCache};
use crate::tools::ToolLookup;
use crate::{GenerationConfig, GenerationRequest, Map, Message, OutputFormat, ToolChoice};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How a prompt picks its model.
#[derive(Clone)]
pub enum ModelSelector {
    /// Looked up by name at call time.
    Name(String),
    Reference(Arc<dyn Model>),
}

impl fmt::Debug for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSelector::Name(name) => f.debug_tuple("Name").field(name).finish(),
            ModelSelector::Reference(model) => {
                f.debug_tuple("Reference").field(&model.name()).finish()
            }
        }
    }
}

/// Per-render inputs besides the variables.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions<'a> {
    /// Prior conversation, placed at `{{history}}` or before the final user
    /// message.
    pub history: Vec<Message>,
    pub partials: Option<&'a Partials>,
    /// `@name` data variables.
    pub data: Map,
}

/// A built prompt.
#[derive(Debug, Clone)]
pub struct PromptDefinition {
    name: String,
    variant: Option<String>,
    template: Arc<CompiledTemplate>,
    input_schema: Option<Schema>,
    output_schema: Option<Schema>,
    output_format: OutputFormat,
    default_variables: Map,
    config: GenerationConfig,
    tools: Vec<String>,
    tool_choice: Option<ToolChoice>,
    model: ModelSelector,
    max_turns: Option<u32>,
    description: Option<String>,
    metadata: Map,
}

impl PromptDefinition {
    pub fn builder(name: impl Into<String>) -> PromptBuilder {
        PromptBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// Registry key: `name`, or `name.variant`.
    pub fn key(&self) -> String {
        prompt_key(&self.name, self.variant.as_deref())
    }

    /// Content hash of the template source.
    pub fn template_hash(&self) -> &str {
        self.template.hash()
    }

    pub fn template(&self) -> &CompiledTemplate {
        &self.template
    }

    pub fn input_schema(&self) -> Option<&Schema> {
        self.input_schema.as_ref()
    }

    pub fn output_schema(&self) -> Option<&Schema> {
        self.output_schema.as_ref()
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn default_variables(&self) -> &Map {
        &self.default_variables
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    pub fn tool_choice(&self) -> Option<ToolChoice> {
        self.tool_choice
    }

    pub fn model(&self) -> &ModelSelector {
        &self.model
    }

    pub fn max_turns(&self) -> Option<u32> {
        self.max_turns
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn metadata(&self) -> &Map {
        &self.metadata
    }

    /// Render `input` into messages.
    ///
    /// `input` must be an object (or null for no variables). It is overlaid
    /// on the default variables and the result is validated against the
    /// input schema before rendering.
    pub fn render(&self, input: Value, options: &RenderOptions<'_>) -> Result<Vec<Message>, PromptError> {
        let input = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(PromptError::InputNotObject {
                    prompt: self.key(),
                    found: shape_name(&other),
                });
            }
        };
        let ctx = RenderContext::merged(&self.default_variables, &input).extend_data(&options.data);
        if let Some(schema) = &self.input_schema {
            schema
                .validate(ctx.root())
                .map_err(|errors| PromptError::InvalidInput {
                    prompt: self.key(),
                    errors,
                })?;
        }
        let rendered = match options.partials {
            Some(partials) => self.template.render_with_partials(&ctx, partials)?,
            None => self.template.render(&ctx)?,
        };
        Ok(to_messages_with_history(&rendered, &options.history))
    }

    /// Render and build the full model request. Every tool name must
    /// resolve through `tools`.
    pub fn to_request(
        &self,
        input: Value,
        options: &RenderOptions<'_>,
        tools: &dyn ToolLookup,
    ) -> Result<GenerationRequest, PromptError> {
        let messages = self.render(input, options)?;
        let definitions = self
            .tools
            .iter()
            .map(|name| {
                tools
                    .find_tool(name)
                    .map(|tool| tool.definition())
                    .ok_or_else(|| PromptError::UnknownTool {
                        prompt: self.key(),
                        tool: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut request = GenerationRequest::new(messages)
            .with_tools(definitions)
            .with_config(self.config.clone())
            .with_output(
                self.output_format,
                self.output_schema.as_ref().map(Schema::to_json_schema),
            );
        if let Some(choice) = self.tool_choice {
            request = request.with_tool_choice(choice);
        }
        debug!(
            prompt = %self.key(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "built request"
        );
        Ok(request)
    }
}

pub(crate) fn prompt_key(name: &str, variant: Option<&str>) -> String {
    match variant {
        Some(v) => format!("{name}.{v}"),
        None => name.to_string(),
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Additive configuration for a [`PromptDefinition`]. Each option may be
/// set once; setting one twice fails [`build`](PromptBuilder::build).
#[derive(Default)]
pub struct PromptBuilder {
    name: String,
    variant: Option<String>,
    template: Option<String>,
    model_name: Option<String>,
    model: Option<Arc<dyn Model>>,
    input_schema: Option<Value>,
    input_example: Option<Value>,
    default_variables: Option<Map>,
    output_format: Option<OutputFormat>,
    output_schema: Option<Value>,
    config: Option<GenerationConfig>,
    tools: Option<Vec<String>>,
    tool_choice: Option<ToolChoice>,
    max_turns: Option<u32>,
    description: Option<String>,
    metadata: Option<Map>,
    duplicates: Vec<&'static str>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, option: &'static str, duplicates: &mut Vec<&'static str>) {
    if slot.is_some() {
        duplicates.push(option);
    }
    *slot = Some(value);
}

impl PromptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        set_once(&mut self.variant, variant.into(), "variant", &mut self.duplicates);
        self
    }

    pub fn template(mut self, source: impl Into<String>) -> Self {
        set_once(&mut self.template, source.into(), "template", &mut self.duplicates);
        self
    }

    /// Model resolved by name at call time.
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        set_once(&mut self.model_name, name.into(), "model_name", &mut self.duplicates);
        self
    }

    pub fn model(mut self, model: Arc<dyn Model>) -> Self {
        set_once(&mut self.model, model, "model", &mut self.duplicates);
        self
    }

    /// Picoschema or JSON Schema for the input variables.
    pub fn input_schema(mut self, schema: Value) -> Self {
        set_once(&mut self.input_schema, schema, "input_schema", &mut self.duplicates);
        self
    }

    /// Example input. Supplies the default variables, and the inferred
    /// input schema when no schema is set.
    pub fn input_example(mut self, example: Value) -> Self {
        set_once(&mut self.input_example, example, "input_example", &mut self.duplicates);
        self
    }

    pub fn default_variables(mut self, defaults: Map) -> Self {
        set_once(&mut self.default_variables, defaults, "default_variables", &mut self.duplicates);
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        set_once(&mut self.output_format, format, "output_format", &mut self.duplicates);
        self
    }

    /// Picoschema or JSON Schema for the output. Implies JSON output unless
    /// a format is set.
    pub fn output_schema(mut self, schema: Value) -> Self {
        set_once(&mut self.output_schema, schema, "output_schema", &mut self.duplicates);
        self
    }

    pub fn config(mut self, config: GenerationConfig) -> Self {
        set_once(&mut self.config, config, "config", &mut self.duplicates);
        self
    }

    pub fn tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        set_once(&mut self.tools, names, "tools", &mut self.duplicates);
        self
    }

    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        set_once(&mut self.tool_choice, choice, "tool_choice", &mut self.duplicates);
        self
    }

    pub fn max_turns(mut self, max_turns: u32) -> Self {
        set_once(&mut self.max_turns, max_turns, "max_turns", &mut self.duplicates);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        set_once(&mut self.description, description.into(), "description", &mut self.duplicates);
        self
    }

    pub fn metadata(mut self, metadata: Map) -> Self {
        set_once(&mut self.metadata, metadata, "metadata", &mut self.duplicates);
        self
    }

    /// Whether either model option is set.
    pub fn has_model(&self) -> bool {
        self.model.is_some() || self.model_name.is_some()
    }

    pub fn key(&self) -> String {
        prompt_key(&self.name, self.variant.as_deref())
    }

    pub fn build(self) -> Result<PromptDefinition, PromptError> {
        self.build_with(None, &NoSchemas)
    }

    /// Build, compiling the template through `cache`.
    pub fn build_cached(self, cache: &TemplateCache) -> Result<PromptDefinition, PromptError> {
        self.build_with(Some(cache), &NoSchemas)
    }

    /// Build with a template cache and a resolver for named schemas.
    pub fn build_with(
        self,
        cache: Option<&TemplateCache>,
        schemas: &dyn SchemaResolver,
    ) -> Result<PromptDefinition, PromptError> {
        let key = self.key();
        if let Some(&option) = self.duplicates.first() {
            return Err(PromptError::DuplicateOption {
                prompt: key,
                option,
            });
        }

        let model = match (self.model, self.model_name) {
            (Some(_), Some(_)) => return Err(PromptError::ConflictingModel(key)),
            (Some(model), None) => ModelSelector::Reference(model),
            (None, Some(name)) => ModelSelector::Name(name),
            (None, None) => return Err(PromptError::MissingModel(key)),
        };

        let source = self
            .template
            .ok_or_else(|| PromptError::MissingTemplate(key.clone()))?;
        let template = match cache {
            Some(cache) => cache.get_or_compile(&source)?,
            None => Arc::new(CompiledTemplate::compile(&source)?),
        };

        let mut default_variables = Map::new();
        let mut input_schema = self
            .input_schema
            .as_ref()
            .map(|v| picoschema::compile_with(v, schemas))
            .transpose()?;
        if let Some(example) = &self.input_example {
            let Value::Object(map) = example else {
                return Err(PromptError::InputNotObject {
                    prompt: key,
                    found: shape_name(example),
                });
            };
            default_variables.extend(map.clone());
            if input_schema.is_none() {
                input_schema = Some(Schema::infer(example));
            }
        }
        if let Some(defaults) = self.default_variables {
            default_variables.extend(defaults);
        }

        let output_schema = self
            .output_schema
            .as_ref()
            .map(|v| picoschema::compile_with(v, schemas))
            .transpose()?;
        let output_format = match (self.output_format, &output_schema) {
            (Some(format), _) => format,
            (None, Some(_)) => OutputFormat::Json,
            (None, None) => OutputFormat::Text,
        };
        if output_format == OutputFormat::Structured && output_schema.is_none() {
            return Err(PromptError::StructuredWithoutSchema(key));
        }

        debug!(prompt = %key, hash = %template.hash(), "built prompt definition");
        Ok(PromptDefinition {
            name: self.name,
            variant: self.variant,
            template,
            input_schema,
            output_schema,
            output_format,
            default_variables,
            config: self.config.unwrap_or_default(),
            tools: self.tools.unwrap_or_default(),
            tool_choice: self.tool_choice,
            model,
            max_turns: self.max_turns,
            description: self.description,
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, NoTools, ToolSet};
    use crate::{Role, ToolDefinition};
    use serde_json::json;

    fn greeting() -> PromptBuilder {
        PromptDefinition::builder("greeting")
            .model_name("demo")
            .input_schema(json!({"name": "string", "title?": "string"}))
            .template("{{role \"system\"}}Be polite.{{role \"user\"}}Greet {{title}} {{name}}.")
    }

    #[test]
    fn renders_roles_and_variables() {
        let prompt = greeting().build().unwrap();
        let messages = prompt
            .render(json!({"name": "Ada", "title": "Dr."}), &RenderOptions::default())
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].text(), "Greet Dr. Ada.");
    }

    #[test]
    fn duplicate_option_is_reported() {
        let err = greeting().model_name("other").build().unwrap_err();
        assert!(matches!(
            err,
            PromptError::DuplicateOption { option: "model_name", .. }
        ));
    }

    #[test]
    fn model_selection_is_exclusive() {
        let model: Arc<dyn Model> = Arc::new(crate::model::FnModel::new(
            "m",
            |_r: GenerationRequest| async move {
                Ok(crate::model::ModelResponse::new(Message::model("")))
            },
        ));
        let both = greeting().model(Arc::clone(&model)).build().unwrap_err();
        assert!(matches!(both, PromptError::ConflictingModel(_)));

        let none = PromptDefinition::builder("p").template("hi").build().unwrap_err();
        assert!(matches!(none, PromptError::MissingModel(_)));

        let by_ref = PromptDefinition::builder("p")
            .model(model)
            .template("hi")
            .build()
            .unwrap();
        assert!(matches!(by_ref.model(), ModelSelector::Reference(_)));
    }

    #[test]
    fn structured_output_needs_schema() {
        let err = greeting()
            .output_format(OutputFormat::Structured)
            .build()
            .unwrap_err();
        assert!(matches!(err, PromptError::StructuredWithoutSchema(_)));

        let implied = greeting()
            .output_schema(json!({"reply": "string"}))
            .build()
            .unwrap();
        assert_eq!(implied.output_format(), OutputFormat::Json);
    }

    #[test]
    fn input_is_validated() {
        let prompt = greeting().build().unwrap();
        let err = prompt
            .render(json!({"title": "Dr."}), &RenderOptions::default())
            .unwrap_err();
        assert!(matches!(err, PromptError::InvalidInput { .. }));

        let err = prompt.render(json!([1]), &RenderOptions::default()).unwrap_err();
        assert!(matches!(err, PromptError::InputNotObject { found: "list", .. }));
    }

    #[test]
    fn example_supplies_schema_and_defaults() {
        let prompt = PromptDefinition::builder("hello")
            .model_name("demo")
            .input_example(json!({"name": "World"}))
            .template("Hello {{name}}!")
            .build()
            .unwrap();
        assert_eq!(prompt.default_variables()["name"], "World");
        assert_eq!(prompt.input_schema().unwrap().required(), ["name"]);
        let messages = prompt.render(Value::Null, &RenderOptions::default()).unwrap();
        assert_eq!(messages[0].text(), "Hello World!");
    }

    #[test]
    fn history_is_inserted_before_user_turn() {
        let prompt = greeting().build().unwrap();
        let options = RenderOptions {
            history: vec![Message::user("earlier"), Message::model("reply")],
            ..Default::default()
        };
        let messages = prompt.render(json!({"name": "Ada"}), &options).unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Model, Role::User]);
    }

    #[test]
    fn request_resolves_tools_and_output() {
        let tools = ToolSet::new().with(FnTool::new(
            ToolDefinition::new("lookup", "Look something up", json!({"type": "object"})),
            |_: Value| async move { Ok(json!("ok")) },
        ));
        let prompt = greeting()
            .tools(["lookup"])
            .tool_choice(ToolChoice::Required)
            .output_schema(json!({"reply": "string"}))
            .build()
            .unwrap();
        let request = prompt
            .to_request(json!({"name": "Ada"}), &RenderOptions::default(), &tools)
            .unwrap();
        assert_eq!(request.tools[0].name, "lookup");
        assert_eq!(request.tool_choice, Some(ToolChoice::Required));
        assert_eq!(request.output_schema.as_ref().unwrap()["required"], json!(["reply"]));

        let err = prompt
            .to_request(json!({"name": "Ada"}), &RenderOptions::default(), &NoTools)
            .unwrap_err();
        assert!(matches!(err, PromptError::UnknownTool { ref tool, .. } if tool == "lookup"));
    }

    #[test]
    fn cached_builds_share_templates() {
        let cache = TemplateCache::new();
        let a = greeting().build_cached(&cache).unwrap();
        let b = greeting().variant("v2").build_cached(&cache).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(a.template_hash(), b.template_hash());
        assert_eq!(b.key(), "greeting.v2");
    }
}
