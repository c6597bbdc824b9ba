//! Render `.prompt` files and compile picoschemas offline.
//!
//! # Examples
//!
//! ```sh
//! # Render a prompt into the messages a model would receive
//! promptkit render prompts/weather.prompt --input '{"city": "Oslo"}'
//!
//! # Splice prior conversation in and resolve partials from a directory
//! promptkit --prompts prompts/ render prompts/chat.prompt --history history.json
//!
//! # Compile a picoschema (JSON or TOML) into JSON Schema
//! promptkit schema schemas/person.toml
//! ```
//!
//! Logging is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use promptkit::Message;
use promptkit::prompt::RenderOptions;
use promptkit::prompt::source::PromptSource;
use promptkit::registry::Registry;
use promptkit::schema::picoschema;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Model name given to prompts without one. Rendering never calls it.
const OFFLINE_MODEL: &str = "offline";

#[derive(Parser)]
#[command(name = "promptkit", version, about)]
struct Cli {
    /// Directory whose partials (`_name.prompt`) are available to templates
    #[arg(long, global = true)]
    prompts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a prompt file and print the resulting request as JSON
    Render {
        file: PathBuf,

        /// Input variables as a JSON object
        #[arg(long)]
        input: Option<String>,

        /// JSON file holding an array of prior messages
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Compile a picoschema file (JSON, or TOML by extension) to JSON Schema
    Schema { file: PathBuf },
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Render {
            file,
            input,
            history,
        } => render(cli.prompts.as_deref(), file, input.as_deref(), history.as_deref()),
        Command::Schema { file } => schema(file),
    };
    match result {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn render(
    prompts_dir: Option<&Path>,
    file: &Path,
    input: Option<&str>,
    history: Option<&Path>,
) -> Result<String, String> {
    let mut registry = Registry::new();
    registry.set_default_model(OFFLINE_MODEL);
    if let Some(dir) = prompts_dir {
        let loaded = promptkit::prompt::source::load_prompt_dir(dir).map_err(|e| e.to_string())?;
        for (name, text) in &loaded.partials {
            registry
                .register_partial(name.clone(), text)
                .map_err(|e| e.to_string())?;
        }
    }

    let source = PromptSource::from_path(file).map_err(|e| e.to_string())?;
    let prompt = registry
        .define_prompt(source.into_builder())
        .map_err(|e| e.to_string())?;

    let input: Value = match input {
        Some(text) => serde_json::from_str(text).map_err(|e| format!("invalid --input JSON: {e}"))?,
        None => Value::Null,
    };
    let history: Vec<Message> = match history {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("invalid history file: {e}"))?
        }
        None => Vec::new(),
    };

    let options = RenderOptions {
        history,
        partials: Some(registry.partials()),
        ..Default::default()
    };
    let messages = prompt.render(input, &options).map_err(|e| e.to_string())?;
    let output = json!({
        "prompt": prompt.key(),
        "templateHash": prompt.template_hash(),
        "messages": messages,
        "config": prompt.config(),
        "tools": prompt.tools(),
        "outputFormat": prompt.output_format(),
        "outputSchema": prompt.output_schema().map(|s| s.to_json_schema()),
    });
    serde_json::to_string_pretty(&output).map_err(|e| e.to_string())
}

fn schema(file: &Path) -> Result<String, String> {
    let text = fs::read_to_string(file)
        .map_err(|e| format!("failed to read '{}': {e}", file.display()))?;
    let value: Value = if file.extension().and_then(|e| e.to_str()) == Some("toml") {
        toml::from_str(&text).map_err(|e| format!("invalid TOML: {e}"))?
    } else {
        serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))?
    };
    let compiled = picoschema::compile(&value).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&compiled.to_json_schema()).map_err(|e| e.to_string())
}
