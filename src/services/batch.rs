use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::services::generation::{GenerationConfig, Invoker};
use crate::services::template::{RenderOptions, Template};

#[derive(Debug)]
pub enum BatchError {
    MissingColumns(Vec<String>),
    CsvError(String),
    FsError(String),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::MissingColumns(columns) => {
                write!(f, "Missing required columns in CSV: {}", columns.join(", "))
            }
            BatchError::CsvError(msg) => write!(f, "CSV error: {}", msg),
            BatchError::FsError(msg) => write!(f, "File system error: {}", msg),
        }
    }
}

impl std::error::Error for BatchError {}

impl From<csv::Error> for BatchError {
    fn from(err: csv::Error) -> Self {
        BatchError::CsvError(err.to_string())
    }
}

impl From<std::io::Error> for BatchError {
    fn from(err: std::io::Error) -> Self {
        BatchError::FsError(err.to_string())
    }
}

/// One unit of input: a field map plus its position in the batch.
/// Immutable once handed to the renderer.
#[derive(Debug, Clone)]
pub struct Record {
    pub index: usize,
    fields: HashMap<String, String>,
}

impl Record {
    pub fn new(index: usize, fields: HashMap<String, String>) -> Self {
        Self { index, fields }
    }

    pub fn from_pairs(index: usize, pairs: &[(&str, &str)]) -> Self {
        let fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(index, fields)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|v| v.as_str())
    }

    /// Identifier used in reports: the name field, or the 1-based row
    /// position when the record has no name.
    pub fn id(&self) -> String {
        match self.get("name") {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("row {}", self.index + 1),
        }
    }
}

/// Reads a delimited batch input with a header row. Every absent required
/// column is reported at once; partial data never proceeds.
pub fn read_records<R: Read>(reader: R, required_columns: &[String]) -> Result<Vec<Record>, BatchError> {
    let mut csv_reader = csv::Reader::from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(|h| h.to_string()).collect();

    let missing: Vec<String> = required_columns
        .iter()
        .filter(|column| !headers.contains(column))
        .cloned()
        .collect();

    if !missing.is_empty() {
        return Err(BatchError::MissingColumns(missing));
    }

    let mut records = Vec::new();
    for (index, row) in csv_reader.records().enumerate() {
        let row = row?;
        let fields = headers
            .iter()
            .zip(row.iter())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        records.push(Record::new(index, fields));
    }

    Ok(records)
}

pub fn read_records_from_path(path: &Path, required_columns: &[String]) -> Result<Vec<Record>, BatchError> {
    let file = std::fs::File::open(path)?;
    read_records(file, required_columns)
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedText {
    pub record_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub record_id: String,
    pub reason: String,
}

/// Aggregate outcome of one batch run. Both lists keep input order, and
/// every processed record lands in exactly one of them.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub successes: Vec<GeneratedText>,
    pub errors: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.successes.len() + self.errors.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub status: String,
}

/// Whether a record-level failure stops the run. The source always
/// continued; fail-fast is opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    BestEffort,
    FailFast,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub render: RenderOptions,
    pub policy: FailurePolicy,
}

/// Drives a template and an invoker over an ordered record collection.
pub struct BatchRunner<I: Invoker> {
    invoker: I,
}

impl<I: Invoker> BatchRunner<I> {
    pub fn new(invoker: I) -> Self {
        Self { invoker }
    }

    /// Processes records strictly in input order. A record's failure is
    /// recorded and, under best effort, never aborts the batch. The cancel
    /// token is honored between records only; an issued call runs to
    /// completion or failure.
    pub async fn run(
        &self,
        records: &[Record],
        template: &Template,
        config: &GenerationConfig,
        options: &BatchOptions,
        cancel_token: CancellationToken,
        progress_callback: impl Fn(BatchProgress),
    ) -> BatchReport {
        let total = records.len();
        let mut report = BatchReport::default();

        info!(total, template = %template.name, "starting batch run");

        for record in records {
            if cancel_token.is_cancelled() {
                info!(completed = report.completed(), "batch cancelled between records");
                break;
            }

            let record_id = record.id();

            let outcome = match template.render(record, &options.render) {
                Ok(rendered) => {
                    let prompt = crate::services::generation::compose_prompt(&template.system_instruction, &rendered);
                    self.invoker.invoke(&prompt, config).await.map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(text) => report.successes.push(GeneratedText {
                    record_id: record_id.clone(),
                    text,
                }),
                Err(reason) => {
                    warn!(record = %record_id, error = %reason, "record failed");
                    report.errors.push(BatchFailure {
                        record_id: record_id.clone(),
                        reason,
                    });

                    if options.policy == FailurePolicy::FailFast {
                        progress_callback(BatchProgress {
                            completed: report.completed(),
                            total,
                            status: format!("stopped after record {} of {} ({})", report.completed(), total, record_id),
                        });
                        return report;
                    }
                }
            }

            progress_callback(BatchProgress {
                completed: report.completed(),
                total,
                status: format!("processing record {} of {} ({})", report.completed(), total, record_id),
            });
        }

        info!(
            successes = report.successes.len(),
            errors = report.errors.len(),
            "batch run finished"
        );

        report
    }
}
