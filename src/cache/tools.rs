use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use super::DiskTools;
use crate::cloud::ArchiveKind;
use crate::error::ProvisionError;
use crate::helpers::command::{CommandRun, ToolFailure};
use crate::hypervisor::powershell::{PowerShell, quote};

const QEMU_IMG: &str = "qemu-img";

/// Disk tooling of a Windows host: Hyper-V cmdlets, `qemu-img` and WSL.
#[derive(Debug, Clone, Default)]
pub struct HostDiskTools {
    powershell: PowerShell,
}

impl HostDiskTools {
    pub fn new(powershell: PowerShell) -> Self {
        Self { powershell }
    }

    fn wsl() -> Result<PathBuf, ProvisionError> {
        which::which("wsl.exe")
            .or_else(|_| which::which("wsl"))
            .map_err(|e| ProvisionError::platform("mount guest disk", format!("WSL is not available: {e}")))
    }
}

impl DiskTools for HostDiskTools {
    fn extract(&self, kind: ArchiveKind, archive: &Path, dest: &Path) -> Result<(), ToolFailure> {
        match kind.extract_command(archive, dest) {
            Some(mut cmd) => cmd.run_captured().map(drop),
            None => Ok(()),
        }
    }

    fn convert_native(&self, source: &Path, dest: &Path) -> Result<(), ToolFailure> {
        let script = format!(
            "Convert-VHD -Path {} -DestinationPath {} -VHDType Dynamic",
            quote(source.to_string_lossy()),
            quote(dest.to_string_lossy())
        );
        self.powershell.run(&script).map(drop)
    }

    fn convert_fallback(&self, source: &Path, dest: &Path) -> Result<(), ToolFailure> {
        Command::new(QEMU_IMG)
            .args(["convert", "-O", "vpc", "-o", "subformat=dynamic"])
            .arg(source)
            .arg(dest)
            .run_captured()
            .map(drop)
    }

    fn compact(&self, disk: &Path) -> Result<(), ToolFailure> {
        let script = format!("Optimize-VHD -Path {} -Mode Full", quote(disk.to_string_lossy()));
        self.powershell.run(&script).map(drop)
    }

    fn rewrite_guest_file(&self, disk: &Path, guest_path: &str, contents: &str) -> Result<(), ProvisionError> {
        let wsl = Self::wsl()?;
        let mount_name = disk
            .file_stem()
            .map(|s| s.to_string_lossy().replace(|c: char| !c.is_ascii_alphanumeric(), "-"))
            .unwrap_or_else(|| "cloud-image".to_string());

        Command::new(&wsl)
            .args(["--mount", "--vhd"])
            .arg(disk)
            .args(["--partition", "1", "--name", mount_name.as_str()])
            .run_captured()
            .map_err(|e| ProvisionError::platform("mount guest disk", e))?;
        debug!("mounted {} at /mnt/wsl/{mount_name}", disk.display());

        let target = format!("/mnt/wsl/{mount_name}/{}", guest_path.trim_start_matches('/'));
        let script = write_file_script(&target, contents)?;
        let written = Command::new(&wsl)
            .args(["-u", "root", "-e", "sh", "-c", script.as_str()])
            .run_captured()
            .map_err(|e| ProvisionError::platform("write guest file", e));

        let unmounted = Command::new(&wsl).arg("--unmount").arg(disk).run_captured();
        if let Err(e) = &unmounted {
            warn!("failed to unmount {}: {e}", disk.display());
        }

        written?;
        unmounted.map(drop).map_err(|e| ProvisionError::platform("unmount guest disk", e))
    }
}

fn write_file_script(target: &str, contents: &str) -> Result<String, ProvisionError> {
    let quote = |value: &str| {
        shlex::try_quote(value)
            .map(|quoted| quoted.into_owned())
            .map_err(|e| ProvisionError::InvalidInput(format!("cannot pass '{value}' to the guest shell: {e}")))
    };
    let parent = target.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".");
    Ok(format!(
        "mkdir -p {} && printf '%s' {} > {}",
        quote(parent)?,
        quote(contents)?,
        quote(target)?
    ))
}
