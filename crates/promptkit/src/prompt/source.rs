//! `.prompt` files: TOML frontmatter fenced by `---` lines, then template
//! text.
//!
//! ```text
//! ---
//! model = "demo-model"
//! tools = ["weather"]
//! max_turns = 3
//!
//! [config]
//! temperature = 0.3
//!
//! [input.schema]
//! city = "string, the city to report on"
//! "units?" = "string"
//!
//! [output]
//! format = "json"
//! schema = { forecast = "string" }
//! ---
//! {{role "system"}}You are terse.
//! {{role "user"}}Weather in {{city}}?
//! ```
//!
//! `name.prompt` defines prompt `name`; `name.variant.prompt` defines the
//! `variant` of `name`. Files starting with `_` are partials named by the
//! rest of the stem. Prompts in subdirectories are named `dir/name`.

use super::{PromptBuilder, PromptDefinition};
use crate::error::PromptError;
use crate::{GenerationConfig, Map, OutputFormat, ToolChoice};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const PROMPT_EXTENSION: &str = "prompt";
const FENCE: &str = "---";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputSection {
    /// Picoschema or JSON Schema.
    pub schema: Option<Value>,
    /// Default variables.
    pub default: Option<Map>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub format: Option<OutputFormat>,
    pub schema: Option<Value>,
}

/// Frontmatter keys. Generation config keys use camelCase
/// (`maxOutputTokens`, `topK`); unknown config keys pass through to the
/// model as custom options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptFrontmatter {
    pub name: Option<String>,
    pub variant: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub tools: Vec<String>,
    pub tool_choice: Option<ToolChoice>,
    pub max_turns: Option<u32>,
    pub config: Option<GenerationConfig>,
    pub input: InputSection,
    pub output: OutputSection,
    pub metadata: Map,
}

/// A parsed prompt source.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSource {
    pub name: String,
    pub variant: Option<String>,
    pub frontmatter: PromptFrontmatter,
    pub template: String,
}

impl PromptSource {
    /// Parse `text`. `source_name` is `name` or `name.variant`, optionally
    /// under a `dir/` prefix; only the last path segment carries a variant.
    /// Frontmatter `name`/`variant` keys override it.
    pub fn parse(source_name: &str, text: &str) -> Result<Self, PromptError> {
        let (frontmatter, template) = split_frontmatter(text);
        let frontmatter: PromptFrontmatter = match frontmatter {
            Some(raw) => toml::from_str(raw).map_err(|e| PromptError::Frontmatter {
                source_name: source_name.to_string(),
                message: e.message().to_string(),
            })?,
            None => PromptFrontmatter::default(),
        };
        let (dir, stem) = match source_name.rsplit_once('/') {
            Some((dir, stem)) => (Some(dir), stem),
            None => (None, source_name),
        };
        let (base, variant) = match stem.split_once('.') {
            Some((base, variant)) => (base, Some(variant.to_string())),
            None => (stem, None),
        };
        let name = match dir {
            Some(dir) => format!("{dir}/{base}"),
            None => base.to_string(),
        };
        Ok(Self {
            name: frontmatter.name.clone().unwrap_or(name),
            variant: frontmatter.variant.clone().or(variant),
            frontmatter,
            template: template.to_string(),
        })
    }

    /// Read and parse a `.prompt` file, naming it by its file stem.
    pub fn from_path(path: &Path) -> Result<Self, PromptError> {
        let text = read(path)?;
        Self::parse(&prompt_stem(path), &text)
    }

    /// A builder carrying every option the source sets.
    pub fn into_builder(self) -> PromptBuilder {
        let fm = self.frontmatter;
        let mut builder = PromptDefinition::builder(self.name).template(self.template);
        if let Some(variant) = self.variant {
            builder = builder.variant(variant);
        }
        if let Some(model) = fm.model {
            builder = builder.model_name(model);
        }
        if let Some(description) = fm.description {
            builder = builder.description(description);
        }
        if !fm.tools.is_empty() {
            builder = builder.tools(fm.tools);
        }
        if let Some(choice) = fm.tool_choice {
            builder = builder.tool_choice(choice);
        }
        if let Some(max_turns) = fm.max_turns {
            builder = builder.max_turns(max_turns);
        }
        if let Some(config) = fm.config {
            builder = builder.config(config);
        }
        if let Some(schema) = fm.input.schema {
            builder = builder.input_schema(schema);
        }
        if let Some(defaults) = fm.input.default {
            builder = builder.default_variables(defaults);
        }
        if let Some(format) = fm.output.format {
            builder = builder.output_format(format);
        }
        if let Some(schema) = fm.output.schema {
            builder = builder.output_schema(schema);
        }
        if !fm.metadata.is_empty() {
            builder = builder.metadata(fm.metadata);
        }
        builder
    }
}

/// Split `---` fenced frontmatter from the body. Text without an opening
/// fence on its first line is all body.
fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text.strip_prefix(FENCE) else {
        return (None, text);
    };
    let Some(rest) = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) else {
        return (None, text);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let (frontmatter, after) = rest.split_at(offset);
            let (_, body) = after.split_at(line.len());
            return (Some(frontmatter), body);
        }
        offset += line.len();
    }
    (None, text)
}

/// Everything a prompt directory holds.
#[derive(Debug, Default)]
pub struct PromptDirectory {
    pub prompts: Vec<PromptSource>,
    /// `(name, template source)`.
    pub partials: Vec<(String, String)>,
}

/// Read every `.prompt` file under `dir`, skipping hidden entries.
/// Results are sorted by file path.
pub fn load_prompt_dir(dir: &Path) -> Result<PromptDirectory, PromptError> {
    let mut out = PromptDirectory::default();
    walk(dir, "", &mut out)?;
    debug!(
        dir = %dir.display(),
        prompts = out.prompts.len(),
        partials = out.partials.len(),
        "loaded prompt directory"
    );
    Ok(out)
}

fn walk(dir: &Path, prefix: &str, out: &mut PromptDirectory) -> Result<(), PromptError> {
    let entries = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(|e| io_error(dir, e))?.path());
    }
    paths.sort();

    for path in paths {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            let nested = format!("{prefix}{file_name}/");
            walk(&path, &nested, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(PROMPT_EXTENSION) {
            continue;
        }
        let stem = prompt_stem(&path);
        if let Some(partial) = stem.strip_prefix('_') {
            out.partials
                .push((format!("{prefix}{partial}"), read(&path)?));
        } else {
            let text = read(&path)?;
            out.prompts
                .push(PromptSource::parse(&format!("{prefix}{stem}"), &text)?);
        }
    }
    Ok(())
}

fn prompt_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn read(path: &Path) -> Result<String, PromptError> {
    fs::read_to_string(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> PromptError {
    PromptError::Io {
        path: path.display().to_string(),
        source,
    }
}
