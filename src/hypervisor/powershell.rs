use std::process::Command;

use crate::error::ProvisionError;
use crate::helpers::command::{CommandRun, ToolFailure};

pub const DEFAULT_POWERSHELL: &str = "powershell.exe";

/// Runs script snippets through a non-interactive PowerShell host.
#[derive(Debug, Clone)]
pub struct PowerShell {
    program: String,
}

impl Default for PowerShell {
    fn default() -> Self {
        Self::new(DEFAULT_POWERSHELL)
    }
}

impl PowerShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the command without running it. Every script runs with
    /// `$ErrorActionPreference = 'Stop'` so a failing cmdlet exits non-zero.
    pub fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Bypass",
            "-Command",
        ])
        .arg(format!("$ErrorActionPreference = 'Stop'; {script}"));
        cmd
    }

    pub fn run(&self, script: &str) -> Result<String, ToolFailure> {
        self.command(script).run_get_string()
    }

    /// Run `script`, reporting a failure as a platform error for `operation`.
    pub fn invoke(&self, operation: &str, script: &str) -> Result<String, ProvisionError> {
        self.run(script).map_err(|e| ProvisionError::platform(operation, e))
    }
}

/// Single-quoted PowerShell string literal.
pub fn quote(value: impl AsRef<str>) -> String {
    format!("'{}'", value.as_ref().replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(quote("C:\\VMs\\web"), "'C:\\VMs\\web'");
        assert_eq!(quote("it's"), "'it''s'");
    }

    #[test]
    fn scripts_stop_on_first_error() {
        let cmd = PowerShell::new("pwsh").command("Get-VM");
        assert_eq!(cmd.get_program(), "pwsh");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args[..4], ["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass"]);
        assert_eq!(args.last().unwrap(), "$ErrorActionPreference = 'Stop'; Get-VM");
    }
}
