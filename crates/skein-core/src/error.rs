use thiserror::Error;

use crate::validator::ValidationIssue;

#[derive(Debug, Error)]
pub enum SkeinError {
    // Structural validation errors
    #[error("DAG validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    // Compiler errors
    #[error("Compilation failed: {0}")]
    Compilation(String),

    // External engine errors
    #[error("Engine error: {0}")]
    Engine(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    // Discovery collaborator errors
    #[error("Discovery error: {0}")]
    Discovery(String),

    // Generation errors
    #[error("{message}")]
    GenerationInvalid {
        message: String,
        errors: Vec<ValidationIssue>,
    },

    #[error("Generation exceeded maximum turns without producing a workflow")]
    TurnsExhausted(usize),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // Run lifecycle errors
    #[error("{0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, SkeinError>;
