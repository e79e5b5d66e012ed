//! CLI: definitions file → (schema | decode | retrieve)
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::Value;

use crate::decode::{decode, DecodeOptions, ErrorMode};
use crate::defs::Definitions;
use crate::encode::encode;
use crate::error::ErrorEntry;
use crate::node::TypeId;
use crate::retrieve::{complete_retrieve, validate, RetrieveOptions};
use crate::schema::{DocumentBuilder, DocumentInfo};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// validate JSON against contract definitions and publish them as OpenAPI
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print the OpenAPI document for a definitions file
    Schema(SchemaOut),
    /// decode documents against a named type
    Decode(DecodeRun),
    /// validate a retrieval specification against a named entity type
    Retrieve(RetrieveRun),
}

#[derive(Args, Debug, Clone)]
struct DefinitionSettings {
    /// definitions file (types and functions)
    #[arg(long)]
    defs: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each document.
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns or '-' for stdin
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct SchemaOut {
    #[command(flatten)]
    definitions: DefinitionSettings,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// document title
    #[arg(long, default_value = "API")]
    title: String,

    /// document version
    #[arg(long, default_value = "0.1.0")]
    api_version: String,
}

#[derive(clap::Parser, Debug)]
struct DecodeRun {
    #[command(flatten)]
    definitions: DefinitionSettings,

    #[command(flatten)]
    input_settings: InputSettings,

    /// declared type to decode against
    #[arg(long = "type")]
    type_name: String,

    /// coerce compatible representations ("30" → 30, "true" → true, ...)
    #[arg(long)]
    cast: bool,

    /// reject undeclared object keys
    #[arg(long)]
    strict: bool,

    /// stop at the first error of each document
    #[arg(long)]
    first_error: bool,
}

#[derive(clap::Parser, Debug)]
struct RetrieveRun {
    #[command(flatten)]
    definitions: DefinitionSettings,

    /// declared entity type (or a type wrapping one)
    #[arg(long = "type")]
    type_name: String,

    /// retrieval specification as JSON text
    #[arg(long)]
    spec: String,

    /// global cap for `take`
    #[arg(long)]
    max_take: Option<u64>,

    /// maximum relation nesting
    #[arg(long, default_value_t = 8)]
    max_depth: usize,

    /// widen the selection to every owned field
    #[arg(long)]
    complete: bool,
}

/// One input document and where it came from.
struct Document {
    source: String,
    value: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn load_documents(&self) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        for source in resolve_sources(&self.input)? {
            let text = source.read()?;
            let label = source.label();
            let raw: Vec<(String, Value)> = if self.ndjson {
                text.lines()
                    .enumerate()
                    .filter(|(_, line)| !line.trim().is_empty())
                    .map(|(ix, line)| {
                        let at = format!("{label}:{}", ix + 1);
                        serde_json::from_str(line).with_context(|| format!("failed to parse JSON ({at})")).map(|v| (at, v))
                    })
                    .collect::<Result<_>>()?
            } else {
                let value = serde_json::from_str(&text).with_context(|| format!("failed to parse JSON ({label})"))?;
                vec![(label, value)]
            };
            for (at, value) in raw {
                let value = match &self.json_pointer {
                    Some(pointer) => value
                        .pointer(pointer)
                        .cloned()
                        .ok_or_else(|| anyhow!("JSON pointer {pointer} selects nothing ({at})"))?,
                    None => value,
                };
                match &self.jq_expr {
                    None => out.push(Document { source: at, value }),
                    Some(jq_expr) => {
                        let results = crate::jq_exec::run_jaq(jq_expr, &value)
                            .with_context(|| format!("failed to apply jq expression ({at})"))?;
                        for (ix, value) in results.into_iter().enumerate() {
                            out.push(Document { source: format!("{at}#{ix}"), value });
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl DefinitionSettings {
    fn load(&self) -> Result<Definitions> {
        Definitions::load(&self.defs).with_context(|| format!("invalid definitions in {}", self.defs.display()))
    }
}

fn lookup(defs: &Definitions, name: &str) -> Result<TypeId> {
    defs.type_id(name).ok_or_else(|| {
        let known = defs.registry.ids().filter_map(|id| defs.registry.name_of(id)).collect::<Vec<_>>();
        anyhow!("unknown type `{name}` (declared: {})", known.join(", "))
    })
}

fn write_output(out: Option<&PathBuf>, text: &str) -> Result<()> {
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out, text).with_context(|| format!("failed to write {}", out.display()))
        }
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn print_errors(source: &str, errors: &[ErrorEntry]) {
    eprintln!("{} {}", "✗".red().bold(), source.bold());
    for e in errors {
        let path = if e.path.is_empty() { "<root>".to_string() } else { e.path.clone() };
        eprintln!("  {} {} {}", path.yellow(), e.error, format!("(got {})", e.value).dimmed());
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> Result<ExitCode> {
        match &self.cmd {
            Command::Schema(target) => {
                let defs = target.definitions.load()?;
                let info = DocumentInfo { title: target.title.clone(), version: target.api_version.clone() };
                let mut doc = DocumentBuilder::new(&defs.registry, info);
                for function in defs.functions.values() {
                    doc.function(function);
                }
                for id in defs.registry.ids() {
                    if defs.registry.name_of(id).is_some() {
                        doc.root(id);
                    }
                }
                let document = doc.build();
                tracing::info!(functions = defs.functions.len(), "schema document built");
                let text = serde_json::to_string_pretty(&document)?;
                write_output(target.out.as_ref(), &text)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Decode(target) => {
                let defs = target.definitions.load()?;
                let id = lookup(&defs, &target.type_name)?;
                let options = DecodeOptions {
                    cast: target.cast,
                    strict: target.strict,
                    error_mode: if target.first_error { ErrorMode::FirstError } else { ErrorMode::Exhaustive },
                    ..DecodeOptions::default()
                };
                let documents = target.input_settings.load_documents()?;
                let results = documents
                    .par_iter()
                    .map(|doc| decode(&defs.registry, id, &doc.value, &options))
                    .collect::<Vec<_>>();
                let mut failed = 0usize;
                for (doc, result) in documents.iter().zip(results) {
                    match result {
                        Ok(value) => {
                            let encoded = encode(&defs.registry, id, &value)?;
                            println!("{}", serde_json::to_string(&encoded)?);
                        }
                        Err(errors) => {
                            failed += 1;
                            print_errors(&doc.source, &errors);
                        }
                    }
                }
                tracing::info!(documents = documents.len(), failed, "decode finished");
                if failed > 0 {
                    eprintln!("{}", format!("{failed} of {} documents failed", documents.len()).red());
                    return Ok(ExitCode::FAILURE);
                }
                Ok(ExitCode::SUCCESS)
            }
            Command::Retrieve(target) => {
                let defs = target.definitions.load()?;
                let id = lookup(&defs, &target.type_name)?;
                let raw: Value = serde_json::from_str(&target.spec).context("--spec is not valid JSON")?;
                let options = RetrieveOptions { max_depth: target.max_depth, max_take: target.max_take };
                match validate(&defs.registry, id, &raw, &options) {
                    Ok(spec) => {
                        let spec = if target.complete { complete_retrieve(&defs.registry, id, &spec) } else { spec };
                        println!("{}", serde_json::to_string_pretty(&spec.to_json())?);
                        Ok(ExitCode::SUCCESS)
                    }
                    Err(error) => {
                        print_errors("--spec", &[ErrorEntry::from(error)]);
                        Ok(ExitCode::FAILURE)
                    }
                }
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

enum Source {
    Stdin,
    File(PathBuf),
}

impl Source {
    fn label(&self) -> String {
        match self {
            Source::Stdin => "<stdin>".to_string(),
            Source::File(path) => path.to_string_lossy().to_string(),
        }
    }

    fn read(&self) -> Result<String> {
        match self {
            Source::Stdin => {
                let mut text = String::new();
                std::io::stdin().read_to_string(&mut text).context("failed to read stdin")?;
                Ok(text)
            }
            Source::File(path) => std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

fn resolve_sources<I>(patterns: I) -> Result<Vec<Source>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::new();
    let mut stdin_seen = false;

    for raw in patterns {
        let pattern = raw.as_ref();

        if pattern == "-" {
            if stdin_seen {
                bail!("stdin ('-') given more than once");
            }
            stdin_seen = true;
            out.push(Source::Stdin);
        } else if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                matched_any = true;
                out.push(Source::File(entry?));
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(Source::File(PathBuf::from(pattern)));
        }
    }

    Ok(out)
}
