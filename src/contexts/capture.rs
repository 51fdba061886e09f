//! Run-and-capture: wraps a unit of work and turns its failure into an
//! [`ErrorContext`] value instead of letting it propagate.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::data::{ErrorContext, ErrorKind};

/// Failures that can be snapshotted as an error context for `source`
pub trait IntoErrorContext {
    fn into_error_context(self, source: &str) -> ErrorContext;
}

impl IntoErrorContext for ErrorContext {
    fn into_error_context(self, _source: &str) -> ErrorContext {
        self
    }
}

impl IntoErrorContext for std::io::Error {
    fn into_error_context(self, source: &str) -> ErrorContext {
        ErrorContext::new(ErrorKind::Other("OSError".to_string()), self.to_string(), source, 0)
    }
}

/// A Python process that exited unsuccessfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// Script that was run; frames from other files are not used
    pub script: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl IntoErrorContext for ScriptFailure {
    fn into_error_context(self, source: &str) -> ErrorContext {
        ErrorContext::from_traceback(source, self.script.as_deref(), &self.stderr).unwrap_or_else(|| {
            let message = match self.stderr.trim() {
                "" => format!("process exited with {:?}", self.exit_code),
                stderr => stderr.lines().last().unwrap_or(stderr).to_string(),
            };
            ErrorContext::new(ErrorKind::Other("ProcessError".to_string()), message, source, 0)
        })
    }
}

/// Runs `work`; on failure returns the captured context and leaves the
/// decision to propagate, diagnose or ignore with the caller
pub fn run_and_capture<T, E, F>(source: &str, work: F) -> Result<T, ErrorContext>
where
    E: IntoErrorContext,
    F: FnOnce() -> Result<T, E>,
{
    work().map_err(|e| {
        let ctx = e.into_error_context(source);
        debug!(kind = %ctx.kind, line = ctx.line_number, "failure captured");
        ctx
    })
}

/// Executes a Python script and returns its stdout
pub fn run_python_script(python: &str, script: &Path) -> Result<String, ScriptFailure> {
    let output = Command::new(python).arg(script).output().map_err(|e| ScriptFailure {
        script: Some(script.to_path_buf()),
        exit_code: None,
        stderr: format!("Failed to spawn {}: {}", python, e),
    })?;

    if !output.status.success() {
        return Err(ScriptFailure {
            script: Some(script.to_path_buf()),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
