//! Generation runs and bookkeeping over session files.

pub mod cleanup;
pub mod config;
pub mod cost;
pub mod error;
pub mod gemini;
pub mod generate;
pub mod image_io;

pub use config::GeminiConfig;
pub use error::{GenerateError, ScanError, ServiceError};
pub use gemini::{GeminiGenerator, GenerationReply, GenerationRequest, ImageGenerator};
pub use generate::{run_generation, GenerateOptions, GenerationOutcome};
