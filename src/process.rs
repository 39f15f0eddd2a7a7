//! Running external tools with bounded time and bounded captured output.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

/// Longest diagnostics string carried into an error
pub(crate) const MAX_DIAGNOSTICS: usize = 4096;

/// Captured result of a finished tool
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Output beyond the capture limit was discarded
    pub truncated: bool,
}

impl ToolOutput {
    /// Human-readable diagnostics: stderr, falling back to stdout, then the
    /// exit status. Long output is cut at [`MAX_DIAGNOSTICS`] bytes.
    pub fn diagnostics(&self) -> String {
        for stream in [&self.stderr, &self.stdout] {
            let text = String::from_utf8_lossy(stream);
            let text = text.trim();
            if !text.is_empty() {
                return truncate(text, MAX_DIAGNOSTICS);
            }
        }
        format!("exited with {}", self.status)
    }
}

#[derive(Debug)]
pub enum RunError {
    /// The program could not be started
    Spawn(std::io::Error),
    /// Reading the tool's output failed
    Io(std::io::Error),
    /// The tool was killed after exceeding its time limit
    Timeout,
}

/// Run `command` to completion, killing it after `limit`.
///
/// At most `max_output` bytes of each stream are kept; the rest is read and
/// dropped so the tool never blocks on a full pipe.
pub async fn run_tool(
    mut command: Command,
    limit: Duration,
    max_output: usize,
) -> Result<ToolOutput, RunError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(command = ?command.as_std(), "running tool");

    let mut child = command.spawn().map_err(RunError::Spawn)?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run = async {
        let (out, err, status) = tokio::try_join!(
            read_capped(stdout, max_output),
            read_capped(stderr, max_output),
            child.wait()
        )?;
        Ok::<_, std::io::Error>((out, err, status))
    };
    let outcome = tokio::time::timeout(limit, run).await;

    match outcome {
        Ok(Ok(((stdout, out_truncated), (stderr, err_truncated), status))) => Ok(ToolOutput {
            status,
            stdout,
            stderr,
            truncated: out_truncated || err_truncated,
        }),
        Ok(Err(err)) => Err(RunError::Io(err)),
        Err(_) => {
            // Reap the child so it does not outlive the timeout
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(RunError::Timeout)
        }
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Why a tool's output file could not be taken
#[derive(Debug)]
pub enum OutputFileError {
    TooLarge,
    Io(std::io::Error),
}

/// Read a file a tool wrote, refusing anything longer than `limit` bytes
pub async fn read_output_file(path: &Path, limit: usize) -> Result<Vec<u8>, OutputFileError> {
    let file = tokio::fs::File::open(path).await.map_err(OutputFileError::Io)?;
    let len = file.metadata().await.map_err(OutputFileError::Io)?.len();
    if len > limit as u64 {
        return Err(OutputFileError::TooLarge);
    }
    let mut bytes = Vec::with_capacity(len as usize);
    // The file may still grow after the size check
    file.take(limit as u64 + 1)
        .read_to_end(&mut bytes)
        .await
        .map_err(OutputFileError::Io)?;
    if bytes.len() > limit {
        return Err(OutputFileError::TooLarge);
    }
    Ok(bytes)
}

async fn read_capped<R>(reader: Option<R>, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    (&mut reader).take(cap as u64).read_to_end(&mut buf).await?;
    let discarded = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok((buf, discarded > 0))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_captures_streams_and_status() {
        let output = run_tool(
            sh("echo converted; echo 'warning: slow' >&2; exit 3"),
            Duration::from_secs(10),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, b"converted\n");
        assert_eq!(output.diagnostics(), "warning: slow");
        assert!(!output.truncated);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let output = run_tool(
            sh("head -c 100000 /dev/zero; echo done >&2"),
            Duration::from_secs(10),
            1000,
        )
        .await
        .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.len(), 1000);
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn test_timeout_kills_tool() {
        let started = std::time::Instant::now();
        let err = run_tool(sh("sleep 30"), Duration::from_millis(200), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let command = Command::new("/nonexistent/xmlpress-tool");
        let err = run_tool(command, Duration::from_secs(1), 1024).await.unwrap_err();
        assert!(matches!(err, RunError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_diagnostics_fall_back_to_status() {
        let output = run_tool(sh("exit 4"), Duration::from_secs(10), 1024).await.unwrap();
        assert!(output.diagnostics().contains('4'));
    }

    #[tokio::test]
    async fn test_read_output_file_enforces_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, vec![b'x'; 2048]).unwrap();

        assert_eq!(read_output_file(&path, 2048).await.unwrap().len(), 2048);
        assert!(matches!(
            read_output_file(&path, 2047).await,
            Err(OutputFileError::TooLarge)
        ));
        assert!(matches!(
            read_output_file(&dir.path().join("absent.pdf"), 2048).await,
            Err(OutputFileError::Io(_))
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é...");
    }
}
