use clap::{Parser, Subcommand, ValueEnum};
use modelsync::{
    diff_schemas, parse_schema, DatabaseSchema, Record, ReconcileOptions, RenameHints,
};
use std::path::Path;
use std::process;
use std::sync::Arc;

/// modelsync CLI: check schema files, inspect the relational structure they
/// imply and plan database changes
#[derive(Parser)]
#[command(name = "modelsync", version, about)]
struct Cli {
    /// Path to the schema file
    #[arg(long, default_value = "schema.yaml")]
    schema: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Load the schema and list its models
    Check,

    /// Show the tables, relation tables and field storage the schema implies
    Target,

    /// Show the changes and DDL that bring a database to the schema
    Plan {
        /// JSON snapshot of the current database structure (default: empty)
        #[arg(long)]
        actual: Option<String>,
        /// Never pair a dropped and an added column as a rename
        #[arg(long)]
        no_infer_renames: bool,
        /// Explicit column rename (e.g. --rename place.lon=lng)
        #[arg(long = "rename", value_parser = parse_rename)]
        renames: Vec<(String, String, String)>,
    },

    /// Build a record from JSON input and validate it
    Validate {
        /// Model name
        model: String,
        /// Record fields as a JSON object
        input: String,
    },
}

fn parse_rename(s: &str) -> Result<(String, String, String), String> {
    let (column, to) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid rename: no '=' found in '{s}'"))?;
    let (table, from) = column
        .split_once('.')
        .ok_or_else(|| format!("Invalid rename: expected table.column=new in '{s}'"))?;
    Ok((table.to_string(), from.to_string(), to.to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(parse_schema(Path::new(&cli.schema))?.into_registry()?);
    log::debug!("loaded {} models from {}", registry.len(), cli.schema);

    match cli.command {
        Command::Check => {
            let models: Vec<serde_json::Value> = registry
                .models()
                .map(|model| {
                    serde_json::json!({
                        "name": model.name(),
                        "table": model.table(),
                        "primary": model.primary(),
                        "lineage": model.lineage(),
                        "properties": model.enabled_properties().map(|p| p.id.clone()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            print_output(&serde_json::json!({ "ok": true, "models": models }), &cli.format);
        }

        Command::Target => {
            let target = modelsync::target(&registry)?;
            print_output(&serde_json::to_value(&target)?, &cli.format);
        }

        Command::Plan {
            actual,
            no_infer_renames,
            renames,
        } => {
            let actual = match actual {
                Some(path) => DatabaseSchema::from_json_str(&std::fs::read_to_string(&path)?)?,
                None => DatabaseSchema::default(),
            };
            let mut options = ReconcileOptions {
                infer_renames: !no_infer_renames,
                rename_hints: RenameHints::new(),
            };
            for (table, from, to) in renames {
                options.rename_hints.add_column_hint(table, from, to);
            }

            let target = modelsync::target(&registry)?;
            let diff = diff_schemas(&actual, &target, &options);
            let changes: Vec<String> = diff.changes.iter().map(|c| c.describe()).collect();
            print_output(
                &serde_json::json!({
                    "changes": changes,
                    "destructive": diff.changes.iter().any(|c| c.is_destructive()),
                    "statements": diff.statements(),
                }),
                &cli.format,
            );
        }

        Command::Validate { model, input } => {
            let input: serde_json::Value = serde_json::from_str(&input)?;
            let record = Record::new(&registry, &model, input)?;
            record.validate()?;
            print_output(&record.serialize_public(), &cli.format);
        }
    }

    Ok(())
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).unwrap());
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value).unwrap());
        }
    }
}

