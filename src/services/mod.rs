pub mod batch;
pub mod export;
pub mod generation;
pub mod template;

pub use batch::{BatchOptions, BatchReport, BatchRunner, FailurePolicy, Record};
pub use generation::{GenerationClient, GenerationConfig};
pub use template::{RenderOptions, Template};
