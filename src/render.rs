//! Render backends turning an intermediate artifact (XSL-FO) into a PDF.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::RenderError;
use crate::http_client::{AsyncHttpClient, HttpClientConfig};
use crate::process::{OutputFileError, RunError, read_output_file, run_tool};
use crate::workspace::Workspace;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
const FO_CONTENT_TYPE: &str = "application/xml";

/// A finished payload and how to serve it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    /// Suggested download name, when the payload is meant to be saved
    pub filename: Option<String>,
}

impl RenderedDocument {
    pub fn new(bytes: Vec<u8>, content_type: &'static str) -> Self {
        Self {
            bytes,
            content_type,
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Produces a PDF from an artifact inside a workspace. Local and remote
/// backends return the same shape, so callers cannot tell them apart.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(
        &self,
        artifact: &Path,
        workspace: &Workspace,
    ) -> Result<RenderedDocument, RenderError>;
}

/// Runs a renderer program. `{input}` and `{output}` in the argument template
/// are replaced by the artifact and the PDF path inside the workspace.
pub struct LocalRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl LocalRenderer {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            max_output_bytes,
        }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        for arg in &self.args {
            let arg = arg
                .replace("{input}", &input.to_string_lossy())
                .replace("{output}", &output.to_string_lossy());
            command.arg(arg);
        }
        command
    }
}

#[async_trait]
impl RenderBackend for LocalRenderer {
    async fn render(
        &self,
        artifact: &Path,
        workspace: &Workspace,
    ) -> Result<RenderedDocument, RenderError> {
        let output = workspace.file("rendered.pdf");
        let command = self.command(artifact, &output);

        let tool = match run_tool(command, self.timeout, self.max_output_bytes).await {
            Ok(tool) => tool,
            Err(RunError::Timeout) => {
                return Err(RenderError::Timeout {
                    target: self.program.clone(),
                    timeout_seconds: self.timeout.as_secs(),
                });
            }
            Err(RunError::Spawn(err) | RunError::Io(err)) => {
                return Err(RenderError::Spawn {
                    program: self.program.clone(),
                    details: err.to_string(),
                });
            }
        };

        if !tool.status.success() {
            return Err(RenderError::Tool {
                program: self.program.clone(),
                exit_code: tool.status.code(),
                diagnostics: tool.diagnostics(),
            });
        }

        let bytes = match read_output_file(&output, self.max_output_bytes).await {
            Ok(bytes) => bytes,
            Err(OutputFileError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Vec::new()
            }
            Err(OutputFileError::Io(err)) => {
                return Err(RenderError::OutputUnreadable {
                    target: self.program.clone(),
                    details: err.to_string(),
                });
            }
            Err(OutputFileError::TooLarge) => {
                return Err(RenderError::OutputTooLarge {
                    target: self.program.clone(),
                    limit: self.max_output_bytes,
                });
            }
        };
        if bytes.is_empty() {
            return Err(RenderError::EmptyOutput {
                target: self.program.clone(),
            });
        }
        info!(program = %self.program, bytes = bytes.len(), "rendered locally");
        Ok(RenderedDocument::new(bytes, PDF_CONTENT_TYPE))
    }
}

/// Posts the artifact to a render service and returns the response body
pub struct RemoteRenderer {
    url: String,
    client: AsyncHttpClient,
}

impl RemoteRenderer {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, RenderError> {
        let url = url.into();
        let client = AsyncHttpClient::new(config).map_err(|e| RenderError::Transport {
            url: url.clone(),
            details: e.to_string(),
        })?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl RenderBackend for RemoteRenderer {
    async fn render(
        &self,
        artifact: &Path,
        _workspace: &Workspace,
    ) -> Result<RenderedDocument, RenderError> {
        let body = tokio::fs::read(artifact).await.map_err(|e| RenderError::Tool {
            program: self.url.clone(),
            exit_code: None,
            diagnostics: format!("artifact unreadable: {e}"),
        })?;
        debug!(url = %self.url, bytes = body.len(), "posting artifact");

        let bytes = self.client.post(&self.url, body, FO_CONTENT_TYPE).await?;
        if bytes.is_empty() {
            return Err(RenderError::EmptyOutput {
                target: self.url.clone(),
            });
        }
        info!(url = %self.url, bytes = bytes.len(), "rendered remotely");
        Ok(RenderedDocument::new(bytes, PDF_CONTENT_TYPE))
    }
}
