// Library interface for blackstrap modules
// This allows tests and other binaries to import modules

pub mod error;
pub mod ingestion;
pub mod llm;
pub mod models;
pub mod seeker;
pub mod sources;
pub mod storage;
pub mod synthesizer;

pub use error::{Error, Result};
