use std::fmt;
use std::process::{Command, Output};

/// Keep error messages readable when a tool dumps pages of diagnostics.
const MAX_STDERR_BYTES: usize = 1024;

/// Outcome of a subprocess that did not succeed.
#[derive(Debug)]
pub struct ToolFailure {
    pub program: String,
    /// `None` when the process could not be spawned or was killed by a signal.
    pub code: Option<i32>,
    pub detail: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with status {code}", self.program)?,
            None => write!(f, "{} did not complete", self.program)?,
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolFailure {}

/// Helpers intended for [`std::process::Command`].
pub trait CommandRun {
    /// Execute the child, capturing its output, and fail if it exits
    /// unsuccessfully.
    fn run_captured(&mut self) -> Result<Output, ToolFailure>;

    /// Execute the child and return its stdout as a trimmed string.
    fn run_get_string(&mut self) -> Result<String, ToolFailure>;
}

impl CommandRun for Command {
    fn run_captured(&mut self) -> Result<Output, ToolFailure> {
        let program = self.get_program().to_string_lossy().into_owned();
        tracing::trace!("exec: {self:?}");

        let output = self.output().map_err(|e| ToolFailure {
            program: program.clone(),
            code: None,
            detail: e.to_string(),
        })?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = last_utf8_content(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            last_utf8_content(&output.stdout)
        } else {
            stderr
        };
        Err(ToolFailure {
            program,
            code: output.status.code(),
            detail: detail.trim().to_string(),
        })
    }

    fn run_get_string(&mut self) -> Result<String, ToolFailure> {
        let output = self.run_captured()?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn last_utf8_content(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(MAX_STDERR_BYTES);
    String::from_utf8_lossy(&buf[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_reported_without_code() {
        let err = Command::new("definitely_not_a_real_command_12345")
            .run_captured()
            .unwrap_err();
        assert_eq!(err.code, None);
        assert!(err.to_string().starts_with("definitely_not_a_real_command_12345 did not complete"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_reports_status_and_stderr() {
        let err = Command::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .run_captured()
            .unwrap_err();
        assert_eq!(err.code, Some(3));
        assert_eq!(err.detail, "boom");
        assert_eq!(err.to_string(), "sh exited with status 3: boom");
    }

    #[cfg(unix)]
    #[test]
    fn stdout_is_returned_trimmed() {
        let out = Command::new("sh").args(["-c", "echo ' hi '"]).run_get_string().unwrap();
        assert_eq!(out, "hi");
    }

    #[test]
    fn long_output_keeps_only_the_tail() {
        let buf = vec![b'x'; MAX_STDERR_BYTES * 3];
        assert_eq!(last_utf8_content(&buf).len(), MAX_STDERR_BYTES);
    }
}
