use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::services::batch::BatchReport;

const RESULT_RULE_WIDTH: usize = 50;

#[derive(Debug)]
pub enum ExportError {
    FsError(String),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::FsError(msg) => write!(f, "File system error: {}", msg),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::FsError(err.to_string())
    }
}

/// All successful texts in one printable document. Each block carries its
/// record identifier and is closed by a rule line; failures are omitted.
pub fn combined_text(report: &BatchReport) -> String {
    let rule = "=".repeat(RESULT_RULE_WIDTH);

    report
        .successes
        .iter()
        .map(|item| format!("RESULT FOR: {}\n\n{}\n\n{}\n\n", item.record_id, item.text, rule))
        .collect()
}

/// Two-column CSV of the successes, RFC 4180 quoting.
pub fn csv_content(report: &BatchReport) -> String {
    let mut out = String::from("name,text\n");

    for item in &report.successes {
        out.push_str(&escape_csv_field(&item.record_id));
        out.push(',');
        out.push_str(&escape_csv_field(&item.text));
        out.push('\n');
    }

    out
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Browser-embeddable data URL for a generated document.
pub fn data_url(content: &str, mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(content.as_bytes()))
}

pub fn write_to_file(path: &Path, content: &str) -> Result<(), ExportError> {
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::batch::{BatchFailure, GeneratedText};

    fn report_with(successes: &[(&str, &str)]) -> BatchReport {
        BatchReport {
            successes: successes
                .iter()
                .map(|(id, text)| GeneratedText {
                    record_id: id.to_string(),
                    text: text.to_string(),
                })
                .collect(),
            errors: Vec::new(),
        }
    }

    mod combined_document {
        use super::*;

        #[test]
        fn test_blocks_in_input_order() {
            let report = report_with(&[("A", "hello"), ("B", "world")]);
            let text = combined_text(&report);

            let rule = "=".repeat(50);
            let expected = format!(
                "RESULT FOR: A\n\nhello\n\n{rule}\n\nRESULT FOR: B\n\nworld\n\n{rule}\n\n"
            );
            assert_eq!(text, expected);
        }

        #[test]
        fn test_failures_are_omitted() {
            let mut report = report_with(&[("A", "hello")]);
            report.errors.push(BatchFailure {
                record_id: "B".to_string(),
                reason: "empty response".to_string(),
            });

            let text = combined_text(&report);
            assert!(text.contains("RESULT FOR: A"));
            assert!(!text.contains("B"), "Failed records should not appear in the document");
        }

        #[test]
        fn test_empty_report_yields_empty_document() {
            let report = report_with(&[]);
            assert_eq!(combined_text(&report), "");
        }
    }

    mod csv_document {
        use super::*;

        #[test]
        fn test_header_and_rows() {
            let report = report_with(&[("Thabo", "Congratulations!"), ("Nomsa", "Well done")]);
            let csv = csv_content(&report);

            assert_eq!(
                csv,
                "name,text\nThabo,Congratulations!\nNomsa,Well done\n"
            );
        }

        #[test]
        fn test_fields_with_commas_are_quoted() {
            let report = report_with(&[("Mokoena, Thabo", "one, two")]);
            let csv = csv_content(&report);
            assert!(csv.contains("\"Mokoena, Thabo\",\"one, two\""));
        }

        #[test]
        fn test_quotes_are_doubled() {
            let report = report_with(&[("A", "she said \"yes\"")]);
            let csv = csv_content(&report);
            assert!(csv.contains("\"she said \"\"yes\"\"\""));
        }

        #[test]
        fn test_newlines_force_quoting() {
            let report = report_with(&[("A", "line one\nline two")]);
            let csv = csv_content(&report);
            assert!(csv.contains("\"line one\nline two\""));
        }

        #[test]
        fn test_plain_fields_are_untouched() {
            assert_eq!(escape_csv_field("plain text"), "plain text");
        }
    }

    mod data_urls {
        use super::*;

        #[test]
        fn test_url_shape_and_payload() {
            let url = data_url("hello", "text/plain");
            assert!(url.starts_with("data:text/plain;base64,"));

            let payload = url.rsplit(',').next().expect("Should have a payload part");
            let decoded = STANDARD.decode(payload).expect("Should be valid base64");
            assert_eq!(decoded, b"hello");
        }

        #[test]
        fn test_csv_mime() {
            let url = data_url("name,text\n", "text/csv");
            assert!(url.starts_with("data:text/csv;base64,"));
        }
    }

    mod file_output {
        use super::*;

        #[test]
        fn test_write_round_trip() {
            let dir = tempfile::tempdir().expect("Should create temp dir");
            let path = dir.path().join("results.txt");

            write_to_file(&path, "RESULT FOR: A\n\nhello\n").expect("Should write file");

            let read_back = std::fs::read_to_string(&path).expect("Should read file back");
            assert_eq!(read_back, "RESULT FOR: A\n\nhello\n");
        }
    }
}
