use crate::services::batch::BatchError;
use crate::services::export::ExportError;
use crate::services::generation::GenerationError;
use crate::services::template::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
