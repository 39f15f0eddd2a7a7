//! Stylesheet transforms run through an external XSLT processor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::params::{ParamSpec, Parameters};
use crate::process::{RunError, run_tool};

/// A stylesheet together with the parameters it accepts
#[derive(Debug, Clone)]
pub struct Stylesheet {
    pub path: PathBuf,
    pub params: &'static [ParamSpec],
}

impl Stylesheet {
    pub fn new(path: impl Into<PathBuf>, params: &'static [ParamSpec]) -> Self {
        Self {
            path: path.into(),
            params,
        }
    }
}

/// How the transform tool is invoked
#[derive(Debug, Clone)]
pub struct TransformSettings {
    pub program: String,
    /// Arguments placed before the source, stylesheet and output arguments
    pub base_args: Vec<String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

/// Runs `program [base args] -s:<source> -xsl:<stylesheet> -o:<output> name=value...`
#[derive(Debug, Clone)]
pub struct TransformationPipeline {
    settings: TransformSettings,
}

impl TransformationPipeline {
    pub fn new(settings: TransformSettings) -> Self {
        Self { settings }
    }

    /// Transform `source` with `stylesheet` into `output`.
    ///
    /// Parameters are checked against the stylesheet's allow-list before the
    /// tool starts. Returns `output` once the tool has exited successfully and
    /// the file exists.
    pub async fn transform(
        &self,
        source: &Path,
        stylesheet: &Stylesheet,
        parameters: &Parameters,
        output: &Path,
    ) -> PipelineResult<PathBuf> {
        parameters.validate(stylesheet.params)?;

        let program = &self.settings.program;
        let mut command = Command::new(program);
        command
            .args(&self.settings.base_args)
            .arg(format!("-s:{}", source.display()))
            .arg(format!("-xsl:{}", stylesheet.path.display()))
            .arg(format!("-o:{}", output.display()))
            .args(parameters.to_args());

        let result = run_tool(command, self.settings.timeout, self.settings.max_output_bytes).await;
        let tool = match result {
            Ok(tool) => tool,
            Err(RunError::Timeout) => {
                return Err(PipelineError::Transform {
                    program: program.clone(),
                    exit_code: None,
                    timed_out: true,
                    diagnostics: format!("timed out after {}s", self.settings.timeout.as_secs()),
                });
            }
            Err(RunError::Spawn(err) | RunError::Io(err)) => {
                return Err(PipelineError::Transform {
                    program: program.clone(),
                    exit_code: None,
                    timed_out: false,
                    diagnostics: err.to_string(),
                });
            }
        };

        if !tool.status.success() {
            return Err(PipelineError::Transform {
                program: program.clone(),
                exit_code: tool.status.code(),
                timed_out: false,
                diagnostics: tool.diagnostics(),
            });
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.is_file() => {
                debug!(output = %output.display(), bytes = meta.len(), "transform finished");
            }
            _ => {
                return Err(PipelineError::MissingOutput {
                    program: program.clone(),
                    path: output.to_path_buf(),
                });
            }
        }
        info!(stylesheet = %stylesheet.path.display(), "transform completed");
        Ok(output.to_path_buf())
    }
}
