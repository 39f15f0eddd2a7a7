use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Stable classification of every failure a service operation can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    NotFound,
    Validation,
    SchemaUnavailable,
    Transform,
    Render,
    InvalidParameter,
    Parse,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Validation => "validation",
            ErrorKind::SchemaUnavailable => "schema-unavailable",
            ErrorKind::Transform => "transform",
            ErrorKind::Render => "render",
            ErrorKind::InvalidParameter => "invalid-parameter",
            ErrorKind::Parse => "parse",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {}", errors.join("; "))]
    SchemaParseFailed { errors: Vec<String> },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Document validation aborted with code {code}")]
    ValidationFailed { code: i32 },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Malformed XML: {details}")]
    InvalidXml { details: String },

    #[error("Invalid XPath expression: {expression}")]
    InvalidXPath { expression: String },

    #[error("Serialization failed: {details}")]
    Serialization { details: String },
}

/// Schema loading and compilation failures.
///
/// Cloneable so a single failed compilation can be shared by every task that
/// was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum SchemaError {
    #[error("Unknown schema name: {name}")]
    UnknownName { name: String },

    #[error("Schema {name} could not be read: {path} - {details}")]
    Unreadable {
        name: String,
        path: PathBuf,
        details: String,
    },

    #[error("Schema {name} failed to compile: {path} - {details}")]
    Compile {
        name: String,
        path: PathBuf,
        details: String,
    },

    #[error("Schema validation internal error: {0}")]
    Internal(#[from] LibXml2Error),

    #[error("Schema task failed: {details}")]
    Concurrency { details: String },
}

/// Failures of the read, mutate, validate, persist cycle
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document {path}: {details}")]
    Parse { path: PathBuf, details: String },

    #[error("No node matches selector {selector}")]
    NotFound { selector: String },

    #[error("Document {path} violates schema {schema}: {}", errors.join("; "))]
    Validation {
        path: PathBuf,
        schema: String,
        errors: Vec<String>,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Document operation failed: {0}")]
    Xml(#[from] LibXml2Error),
}

/// Render failures. Each variant belongs to exactly one [`RenderErrorKind`].
#[derive(Error, Debug, Clone)]
pub enum RenderError {
    #[error("Renderer {program} failed (exit code {exit_code:?}): {diagnostics}")]
    Tool {
        program: String,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("Renderer {program} could not be started: {details}")]
    Spawn { program: String, details: String },

    #[error("Renderer produced no output: {target}")]
    EmptyOutput { target: String },

    #[error("Renderer output from {target} exceeds {limit} bytes")]
    OutputTooLarge { target: String, limit: usize },

    #[error("Renderer output from {target} could not be read: {details}")]
    OutputUnreadable { target: String, details: String },

    #[error("Render service returned HTTP {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Render service unreachable: {url} - {details}")]
    Transport { url: String, details: String },

    #[error("Render timed out: {target} after {timeout_seconds} seconds")]
    Timeout { target: String, timeout_seconds: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    Tool,
    Status,
    Transport,
    Timeout,
}

impl RenderError {
    pub fn kind(&self) -> RenderErrorKind {
        match self {
            RenderError::Tool { .. }
            | RenderError::Spawn { .. }
            | RenderError::EmptyOutput { .. }
            | RenderError::OutputTooLarge { .. }
            | RenderError::OutputUnreadable { .. } => RenderErrorKind::Tool,
            RenderError::Status { .. } => RenderErrorKind::Status,
            RenderError::Transport { .. } => RenderErrorKind::Transport,
            RenderError::Timeout { .. } => RenderErrorKind::Timeout,
        }
    }

    /// HTTP status of a remote rejection
    pub fn status(&self) -> Option<u16> {
        match self {
            RenderError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Transform and render pipeline failures
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Transform {program} failed (exit code {exit_code:?}): {diagnostics}")]
    Transform {
        program: String,
        exit_code: Option<i32>,
        timed_out: bool,
        diagnostics: String,
    },

    #[error("Transform {program} reported success but wrote no output at {path}")]
    MissingOutput { program: String, path: PathBuf },

    #[error("Transform output {path} exceeds {limit} bytes")]
    OutputTooLarge { path: PathBuf, limit: usize },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error returned by every public service operation
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<SchemaError> for ServiceError {
    fn from(err: SchemaError) -> Self {
        ServiceError::Store(StoreError::Schema(err))
    }
}

impl From<RenderError> for ServiceError {
    fn from(err: RenderError) -> Self {
        ServiceError::Pipeline(PipelineError::Render(err))
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Store(err) => match err {
                StoreError::Io { .. } => ErrorKind::Io,
                StoreError::Parse { .. } => ErrorKind::Parse,
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::Validation { .. } => ErrorKind::Validation,
                StoreError::Schema(SchemaError::Internal(_) | SchemaError::Concurrency { .. }) => {
                    ErrorKind::Internal
                }
                StoreError::Schema(_) => ErrorKind::SchemaUnavailable,
                StoreError::Xml(_) => ErrorKind::Internal,
            },
            ServiceError::Pipeline(err) => match err {
                PipelineError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
                PipelineError::Transform { .. }
                | PipelineError::MissingOutput { .. }
                | PipelineError::OutputTooLarge { .. } => ErrorKind::Transform,
                PipelineError::Render(_) => ErrorKind::Render,
                PipelineError::Workspace { .. } | PipelineError::Io { .. } => ErrorKind::Io,
            },
            ServiceError::Config(_) => ErrorKind::Config,
        }
    }

    /// Message safe to show to an end user: filesystem paths and internal
    /// details are withheld, tool and validation diagnostics are kept.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Store(StoreError::NotFound { selector }) => {
                format!("No matching entry for {selector}")
            }
            ServiceError::Store(StoreError::Validation { errors, .. }) => {
                format!("Validation failed: {}", errors.join("; "))
            }
            ServiceError::Store(StoreError::Parse { .. }) => {
                "The stored document is malformed".to_string()
            }
            ServiceError::Store(StoreError::Io { .. })
            | ServiceError::Pipeline(PipelineError::Io { .. })
            | ServiceError::Pipeline(PipelineError::Workspace { .. }) => {
                "A storage error occurred".to_string()
            }
            ServiceError::Store(StoreError::Schema(_))
            | ServiceError::Store(StoreError::Xml(_)) => {
                tracing::error!(error = %self, "internal error");
                "Internal server error".to_string()
            }
            ServiceError::Pipeline(PipelineError::InvalidParameter { name, reason }) => {
                format!("Invalid parameter {name}: {reason}")
            }
            ServiceError::Pipeline(PipelineError::Transform {
                timed_out: true, ..
            }) => "Transformation timed out".to_string(),
            ServiceError::Pipeline(PipelineError::Transform { diagnostics, .. }) => {
                format!("Transformation failed: {diagnostics}")
            }
            ServiceError::Pipeline(PipelineError::MissingOutput { .. }) => {
                "Transformation produced no output".to_string()
            }
            ServiceError::Pipeline(PipelineError::OutputTooLarge { limit, .. }) => {
                format!("Transformation output exceeds {limit} bytes")
            }
            ServiceError::Pipeline(PipelineError::Render(err)) => match err {
                RenderError::Tool { diagnostics, .. } => format!("Rendering failed: {diagnostics}"),
                RenderError::Status { status, body, .. } => {
                    format!("Render service error {status}: {body}")
                }
                RenderError::Transport { .. } => "Render service unreachable".to_string(),
                RenderError::Timeout { .. } => "Rendering timed out".to_string(),
                RenderError::OutputTooLarge { limit, .. } => {
                    format!("Rendering failed: output exceeds {limit} bytes")
                }
                RenderError::Spawn { .. }
                | RenderError::EmptyOutput { .. }
                | RenderError::OutputUnreadable { .. } => "Rendering failed".to_string(),
            },
            ServiceError::Config(err) => format!("Configuration error: {err}"),
        }
    }
}

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Pipeline result type alias
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Schema result type alias
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
