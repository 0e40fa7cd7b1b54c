use std::path::{Path, PathBuf};
use std::process::Command;

use super::{AuthoringTool, DiscConvention};
use crate::error::ProvisionError;
use crate::helpers::command::{CommandRun, ToolFailure};

/// Searched on `PATH` in this order when no tool is configured.
pub const CANDIDATES: [&str; 4] = ["genisoimage", "mkisofs", "xorriso", "oscdimg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// `genisoimage` and `mkisofs` share their options.
    Mkisofs,
    Xorriso,
    Oscdimg,
}

impl Flavor {
    fn for_program(program: &Path) -> Self {
        let stem = program
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if stem.contains("xorriso") {
            Flavor::Xorriso
        } else if stem.contains("oscdimg") {
            Flavor::Oscdimg
        } else {
            Flavor::Mkisofs
        }
    }
}

/// External disc authoring program.
#[derive(Debug, Clone)]
pub struct IsoAuthoringTool {
    program: PathBuf,
    flavor: Flavor,
}

impl IsoAuthoringTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let flavor = Flavor::for_program(&program);
        Self { program, flavor }
    }

    /// Use `explicit` when given, else the first of [`CANDIDATES`] on `PATH`.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ProvisionError> {
        if let Some(path) = explicit {
            let program = which::which(path)
                .map_err(|e| ProvisionError::Packaging(format!("authoring tool {}: {e}", path.display())))?;
            return Ok(Self::new(program));
        }

        CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::new)
            .ok_or_else(|| {
                ProvisionError::Packaging(format!("no disc authoring tool found (tried {})", CANDIDATES.join(", ")))
            })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, source_dir: &Path, output: &Path, convention: DiscConvention) -> Command {
        let label = convention.volume_label();
        let mut cmd = Command::new(&self.program);
        match self.flavor {
            Flavor::Mkisofs | Flavor::Xorriso => {
                if self.flavor == Flavor::Xorriso {
                    cmd.args(["-as", "mkisofs"]);
                }
                cmd.arg("-output").arg(output).args(["-volid", label]);
                // xorriso cannot write UDF; cloud-init also scans ISO9660 media for ovf-env.xml.
                if convention == DiscConvention::Azure && self.flavor == Flavor::Mkisofs {
                    cmd.arg("-udf");
                }
                cmd.args(["-joliet", "-rock"]).arg(source_dir);
            }
            Flavor::Oscdimg => {
                match convention {
                    DiscConvention::NoCloud => cmd.arg("-j1"),
                    DiscConvention::Azure => cmd.args(["-u2", "-udfver102"]),
                };
                cmd.arg(format!("-l{label}")).arg(source_dir).arg(output);
            }
        }
        cmd
    }
}

impl AuthoringTool for IsoAuthoringTool {
    fn author(&self, source_dir: &Path, output: &Path, convention: DiscConvention) -> Result<(), ToolFailure> {
        self.command(source_dir, output, convention).run_captured().map(drop)
    }
}
