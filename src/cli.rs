use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ApiConfig;
use crate::services::batch::{self, BatchOptions, FailurePolicy, Record};
use crate::services::export;
use crate::services::generation::{compose_prompt, GenerationClient, GenerationConfig};
use crate::services::template::{RenderOptions, Template};

#[derive(Parser)]
#[command(name = "promptme", version, about = "Template-driven batch text generation against the Gemini API")]
pub struct Cli {
    /// API key; falls back to the GOOGLE_API_KEY environment variable
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// Model identifier
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// API endpoint base URL
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Log filter, e.g. "info" or "promptme=debug"
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate text for a single record given as --field key=value pairs
    Generate {
        /// Record field, repeatable: --field name=Thabo --field gender=Male
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,

        /// Template JSON file; the built-in completion letter when absent
        #[arg(long)]
        template: Option<PathBuf>,

        /// Pronoun used when the gender field is absent or unrecognized
        #[arg(long, default_value = "he")]
        fallback_pronoun: String,

        /// Write the result here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Generate text for every row of a CSV file
    Batch {
        /// Input CSV; its header must cover the template's placeholders
        #[arg(long)]
        input: PathBuf,

        /// Template JSON file; the built-in completion letter when absent
        #[arg(long)]
        template: Option<PathBuf>,

        /// Pronoun used when the gender field is absent or unrecognized
        #[arg(long, default_value = "he")]
        fallback_pronoun: String,

        /// Stop at the first failed record instead of continuing
        #[arg(long)]
        fail_fast: bool,

        /// Write the combined text document here
        #[arg(long)]
        out_text: Option<PathBuf>,

        /// Write the name,text CSV here
        #[arg(long)]
        out_csv: Option<PathBuf>,

        /// Print base64 data URLs for the outputs instead of plain text
        #[arg(long)]
        data_urls: bool,
    },

    /// Inspect or scaffold template files
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },
}

#[derive(Subcommand)]
pub enum TemplateCommand {
    /// Write the built-in completion letter template to a file
    Init { path: PathBuf },

    /// Print a template and the CSV columns it requires
    Show {
        /// Template JSON file; the built-in completion letter when absent
        path: Option<PathBuf>,
    },
}

pub fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Generate {
            fields,
            template,
            fallback_pronoun,
            out,
        } => {
            let api = ApiConfig::resolve(cli.api_key.as_deref(), cli.model.as_deref(), cli.endpoint.as_deref())?;
            run_generate(api, &fields, template.as_deref(), fallback_pronoun, out.as_deref()).await
        }
        Command::Batch {
            input,
            template,
            fallback_pronoun,
            fail_fast,
            out_text,
            out_csv,
            data_urls,
        } => {
            let api = ApiConfig::resolve(cli.api_key.as_deref(), cli.model.as_deref(), cli.endpoint.as_deref())?;
            let options = BatchOptions {
                render: RenderOptions { fallback_pronoun },
                policy: if fail_fast { FailurePolicy::FailFast } else { FailurePolicy::BestEffort },
            };
            run_batch(api, &input, template.as_deref(), options, out_text.as_deref(), out_csv.as_deref(), data_urls).await
        }
        Command::Template { command } => run_template(command),
    }
}

fn load_template(path: Option<&Path>) -> anyhow::Result<Template> {
    match path {
        Some(path) => {
            Template::load(path).with_context(|| format!("failed to load template from {}", path.display()))
        }
        None => Ok(Template::completion_letter()),
    }
}

fn parse_fields(fields: &[String]) -> anyhow::Result<Record> {
    let mut pairs = std::collections::HashMap::new();
    for field in fields {
        let (key, value) = field
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got '{}'", field))?;
        pairs.insert(key.trim().to_string(), value.to_string());
    }
    Ok(Record::new(0, pairs))
}

async fn run_generate(
    api: ApiConfig,
    fields: &[String],
    template_path: Option<&Path>,
    fallback_pronoun: String,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let template = load_template(template_path)?;
    let record = parse_fields(fields)?;

    let rendered = template.render(&record, &RenderOptions { fallback_pronoun })?;
    let prompt = compose_prompt(&template.system_instruction, &rendered);

    info!(template = %template.name, "generating");
    let client = GenerationClient::new(api);
    let text = client.generate(&prompt, &GenerationConfig::default()).await?;

    match out {
        Some(path) => {
            export::write_to_file(path, &text)?;
            info!(path = %path.display(), "result written");
        }
        None => println!("{}", text),
    }

    Ok(())
}

async fn run_batch(
    api: ApiConfig,
    input: &Path,
    template_path: Option<&Path>,
    options: BatchOptions,
    out_text: Option<&Path>,
    out_csv: Option<&Path>,
    data_urls: bool,
) -> anyhow::Result<()> {
    let template = load_template(template_path)?;
    let records = batch::read_records_from_path(input, &template.required_fields())
        .with_context(|| format!("failed to read records from {}", input.display()))?;

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current record");
            signal_token.cancel();
        }
    });

    let runner = batch::BatchRunner::new(GenerationClient::new(api));
    let report = runner
        .run(
            &records,
            &template,
            &GenerationConfig::default(),
            &options,
            cancel_token,
            |progress| eprintln!("{}", progress.status),
        )
        .await;

    info!(
        successes = report.successes.len(),
        errors = report.errors.len(),
        "batch complete"
    );
    for failure in &report.errors {
        warn!(record = %failure.record_id, "{}", failure.reason);
    }

    let text_document = export::combined_text(&report);
    let csv_document = export::csv_content(&report);

    if data_urls {
        println!("{}", export::data_url(&text_document, "text/plain"));
        println!("{}", export::data_url(&csv_document, "text/csv"));
    }

    match out_text {
        Some(path) => {
            export::write_to_file(path, &text_document)?;
            info!(path = %path.display(), "text document written");
        }
        None if !data_urls => print!("{}", text_document),
        None => {}
    }

    if let Some(path) = out_csv {
        export::write_to_file(path, &csv_document)?;
        info!(path = %path.display(), "csv document written");
    }

    if !report.errors.is_empty() && options.policy == FailurePolicy::FailFast {
        anyhow::bail!("batch stopped after a failed record");
    }

    Ok(())
}

fn run_template(command: TemplateCommand) -> anyhow::Result<()> {
    match command {
        TemplateCommand::Init { path } => {
            let template = Template::completion_letter();
            template.save(&path)?;
            info!(path = %path.display(), "template written");
            Ok(())
        }
        TemplateCommand::Show { path } => {
            let template = load_template(path.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&template)?);
            println!();
            println!("required columns: {}", template.required_fields().join(", "));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod argument_parsing {
        use super::*;

        #[test]
        fn test_generate_collects_repeated_fields() {
            let cli = Cli::try_parse_from([
                "promptme",
                "generate",
                "--field",
                "name=Thabo",
                "--field",
                "gender=Male",
            ])
            .expect("Should parse");

            match cli.command {
                Command::Generate { fields, .. } => {
                    assert_eq!(fields, vec!["name=Thabo", "gender=Male"]);
                }
                _ => panic!("Expected the generate subcommand"),
            }
        }

        #[test]
        fn test_batch_requires_input() {
            let result = Cli::try_parse_from(["promptme", "batch"]);
            assert!(result.is_err(), "Should reject batch without --input");
        }

        #[test]
        fn test_global_flags_after_subcommand() {
            let cli = Cli::try_parse_from([
                "promptme",
                "batch",
                "--input",
                "people.csv",
                "--api-key",
                "k",
                "--fail-fast",
            ])
            .expect("Should parse");

            assert_eq!(cli.api_key.as_deref(), Some("k"));
            match cli.command {
                Command::Batch { fail_fast, .. } => assert!(fail_fast),
                _ => panic!("Expected the batch subcommand"),
            }
        }
    }

    mod field_parsing {
        use super::*;

        #[test]
        fn test_key_value_pairs() {
            let record = parse_fields(&["name=Thabo".to_string(), "goals=sell, save".to_string()])
                .expect("Should parse fields");

            assert_eq!(record.get("name"), Some("Thabo"));
            assert_eq!(record.get("goals"), Some("sell, save"));
        }

        #[test]
        fn test_value_may_contain_equals() {
            let record = parse_fields(&["goals=profit = revenue - cost".to_string()]).expect("Should parse");
            assert_eq!(record.get("goals"), Some("profit = revenue - cost"));
        }

        #[test]
        fn test_missing_separator_is_rejected() {
            let result = parse_fields(&["name".to_string()]);
            assert!(result.is_err(), "Should reject a field without '='");
        }
    }
}
