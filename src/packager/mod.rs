//! Packs the rendered payload into the disc image attached to the machine.

pub mod authoring;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cloud::{Protocol, ProvisioningPayload};
use crate::error::{IoContext, ProvisionError};
use crate::helpers::command::ToolFailure;

pub use self::authoring::IsoAuthoringTool;

/// File system and volume label the guest agent looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscConvention {
    /// ISO9660 with Joliet and Rock Ridge, labelled `cidata`.
    NoCloud,
    /// UDF, labelled `OVF_ENV`.
    Azure,
}

impl DiscConvention {
    pub fn volume_label(&self) -> &'static str {
        match self {
            DiscConvention::NoCloud => "cidata",
            DiscConvention::Azure => "OVF_ENV",
        }
    }
}

impl From<Protocol> for DiscConvention {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::NoCloud => DiscConvention::NoCloud,
            Protocol::Azure => DiscConvention::Azure,
        }
    }
}

pub trait AuthoringTool {
    /// Build a disc image at `output` from the files in `source_dir`.
    fn author(&self, source_dir: &Path, output: &Path, convention: DiscConvention) -> Result<(), ToolFailure>;
}

/// Write the documents `protocol` expects under their mandated names.
fn write_documents(dir: &Path, payload: &ProvisioningPayload, protocol: Protocol) -> Result<Vec<PathBuf>, ProvisionError> {
    let mut files: Vec<(&str, &str)> = Vec::new();
    match protocol {
        Protocol::NoCloud => {
            files.push((ProvisioningPayload::META_DATA_FILE, payload.meta_data.as_str()));
            files.push((ProvisioningPayload::USER_DATA_FILE, payload.user_data.as_str()));
            if let Some(network) = &payload.network_config {
                files.push((ProvisioningPayload::NETWORK_CONFIG_FILE, network.as_str()));
            }
        }
        Protocol::Azure => {
            let env = payload
                .provider_env
                .as_deref()
                .ok_or_else(|| ProvisionError::Packaging("payload has no ovf-env.xml document".to_string()))?;
            files.push((ProvisioningPayload::OVF_ENV_FILE, env));
        }
    }

    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files {
        let path = dir.join(name);
        fs::write(&path, contents).io_context(|| format!("write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

/// Produce the provisioning disc at `output`. The staging directory is
/// removed on every path.
pub fn package(
    payload: &ProvisioningPayload,
    protocol: Protocol,
    tool: &dyn AuthoringTool,
    output: &Path,
) -> Result<PathBuf, ProvisionError> {
    let staging = tempfile::Builder::new()
        .prefix("cloud-vm-payload-")
        .tempdir()
        .io_context(|| "create payload staging directory")?;

    let written = write_documents(staging.path(), payload, protocol)?;
    debug!("staged {} document(s) in {}", written.len(), staging.path().display());

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
    }
    if output.exists() {
        fs::remove_file(output).io_context(|| format!("remove {}", output.display()))?;
    }

    let convention = DiscConvention::from(protocol);
    tool.author(staging.path(), output, convention)
        .map_err(|e| ProvisionError::Packaging(e.to_string()))?;

    if !output.is_file() {
        return Err(ProvisionError::Packaging(format!(
            "authoring tool reported success but {} was not created",
            output.display()
        )));
    }
    Ok(output.to_path_buf())
}
