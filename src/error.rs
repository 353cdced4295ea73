use serde::Serialize;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DevError {
    #[error("{0}")]
    Precondition(String),
    #[error("inconsistent environment: {0}")]
    Inconsistent(String),
    #[error("{0}")]
    MissingArtifact(String),
    #[error("{message}")]
    Tool {
        message: String,
        details: ProcessErrorDetails,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DevError {
    /// Exit status for the whole invocation: a failing tool's own code, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Tool { details, .. } => match details.exit_code {
                Some(code) if code != 0 => code,
                _ => 1,
            },
            _ => 1,
        }
    }

    pub fn details(&self) -> Option<&ProcessErrorDetails> {
        match self {
            Self::Tool { details, .. } => Some(details),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Precondition(_) => "precondition_violation",
            Self::Inconsistent(_) => "inconsistent_environment",
            Self::MissingArtifact(_) => "missing_artifact",
            Self::Tool { .. } => "external_tool_failure",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Prompt(_) => "prompt_error",
            Self::Yaml(_) => "yaml_error",
            Self::Json(_) => "json_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessErrorDetails {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}
