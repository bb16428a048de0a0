//! Error types for the testmind library.
//!
//! This module provides structured error handling for all testmind
//! operations. Every failure surfaced by the library carries a stable kind
//! identifier and a human-readable message so callers can branch on the
//! taxonomy without string matching.

use std::io;

use thiserror::Error;

/// Main result type for testmind operations.
pub type Result<T> = std::result::Result<T, TestMindError>;

/// Comprehensive error type for all testmind operations.
#[derive(Error, Debug)]
pub enum TestMindError {
    /// Static analysis failures: AST I/O, unsupported language, missing
    /// function by name.
    #[error("Analysis error: {message}")]
    Analysis {
        /// Error description
        message: String,
        /// File path that was being analyzed
        path: Option<String>,
        /// Function name that was queried
        function: Option<String>,
    },

    /// Generation failures: LLM transport exhaustion, unparseable
    /// responses, quality-gate rejections.
    #[error("Generation error: {message}")]
    Generation {
        /// Error description
        message: String,
        /// Pipeline stage where the failure occurred
        stage: Option<String>,
    },

    /// Evaluation failures: the validator script failed to execute or
    /// returned malformed output.
    #[error("Evaluation error: {message}")]
    Evaluation {
        /// Error description
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// Resource errors: vector store unavailable, disk full, permission
    /// denied.
    #[error("Resource error: {message}")]
    Resource {
        /// Error description
        message: String,
        /// Resource that was unavailable
        resource: Option<String>,
    },

    /// I/O related errors (file operations, subprocess spawning)
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Parsing and language processing errors
    #[error("Parse error in {language}: {message}")]
    Parse {
        /// Source language being parsed
        language: String,
        /// Error description
        message: String,
        /// File path where the error occurred
        file_path: Option<String>,
    },

    /// Cache and storage errors
    #[error("Cache error: {message}")]
    Cache {
        /// Error description
        message: String,
        /// Cache key that caused the issue
        key: Option<String>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl TestMindError {
    /// Create a new analysis error
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis {
            message: message.into(),
            path: None,
            function: None,
        }
    }

    /// Create a new analysis error with the queried path
    pub fn analysis_at(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Analysis {
            message: message.into(),
            path: Some(path.into()),
            function: None,
        }
    }

    /// Create a new analysis error for a missing function
    pub fn function_not_found(path: impl Into<String>, function: impl Into<String>) -> Self {
        let function = function.into();
        Self::Analysis {
            message: format!("function '{function}' not found"),
            path: Some(path.into()),
            function: Some(function),
        }
    }

    /// Create a new generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            stage: None,
        }
    }

    /// Create a new generation error with stage context
    pub fn generation_stage(message: impl Into<String>, stage: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            stage: Some(stage.into()),
        }
    }

    /// Create a new evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new resource error
    pub fn resource(message: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            resource: Some(resource.into()),
        }
    }

    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new parse error
    pub fn parse(language: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            language: language.into(),
            message: message.into(),
            file_path: None,
        }
    }

    /// Create a new parse error with file context
    pub fn parse_in_file(
        language: impl Into<String>,
        message: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self::Parse {
            language: language.into(),
            message: message.into(),
            file_path: Some(file_path.into()),
        }
    }

    /// Create a new cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            key: None,
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Stable kind identifier for this error, independent of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Analysis { .. } => "analysis",
            Self::Generation { .. } => "generation",
            Self::Evaluation { .. } => "evaluation",
            Self::Configuration { .. } => "configuration",
            Self::Resource { .. } => "resource",
            Self::Io { .. } => "io",
            Self::Parse { .. } => "parse",
            Self::Cache { .. } => "cache",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if let Self::Internal { context: ctx, .. } = &mut self {
            *ctx = Some(context.into());
        }
        self
    }
}

impl From<io::Error> for TestMindError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for TestMindError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for TestMindError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for TestMindError {
    fn from(err: reqwest::Error) -> Self {
        Self::Generation {
            message: format!("HTTP transport failed: {err}"),
            stage: Some("transport".to_string()),
        }
    }
}

impl From<bincode::Error> for TestMindError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization {
            message: format!("Binary serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<TestMindError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
