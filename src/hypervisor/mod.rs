pub mod hyperv;
pub mod powershell;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cloud::{Generation, HardwareIdentity, MachineSpec, NetworkAttachment};
use crate::error::{IoContext, ProvisionError};

pub use self::hyperv::HyperV;

/// Machine lifecycle operations of the virtualization platform. Every call is
/// independently fallible; callers abort on the first error.
pub trait Hypervisor {
    fn machine_exists(&self, name: &str) -> Result<bool, ProvisionError>;

    /// Paths of the hard disks attached to `name`.
    fn attached_disks(&self, name: &str) -> Result<Vec<PathBuf>, ProvisionError>;

    /// Power off `name` if it is running.
    fn stop_machine(&self, name: &str) -> Result<(), ProvisionError>;

    fn remove_machine(&self, name: &str) -> Result<(), ProvisionError>;

    /// Copy the cached image into a new dynamic disk at `dest`.
    fn create_system_disk(&self, source: &Path, dest: &Path) -> Result<(), ProvisionError>;

    /// Grow `disk` to `size_bytes`; disks already that large are left alone.
    fn resize_disk(&self, disk: &Path, size_bytes: u64) -> Result<(), ProvisionError>;

    fn create_machine(&self, spec: &MachineSpec) -> Result<(), ProvisionError>;

    fn set_processor(&self, name: &str, cpus: u32) -> Result<(), ProvisionError>;

    fn set_memory(&self, name: &str, bytes: u64) -> Result<(), ProvisionError>;

    fn set_firmware(&self, name: &str, generation: Generation) -> Result<(), ProvisionError>;

    fn attach_dvd(&self, name: &str, iso: &Path) -> Result<(), ProvisionError>;

    fn set_identity(&self, name: &str, identity: &HardwareIdentity) -> Result<(), ProvisionError>;

    fn connect_network(&self, name: &str, network: &NetworkAttachment) -> Result<(), ProvisionError>;

    fn set_serial_port(&self, name: &str, pipe: &str) -> Result<(), ProvisionError>;

    fn checkpoint(&self, name: &str, checkpoint_name: &str) -> Result<(), ProvisionError>;

    fn start_machine(&self, name: &str) -> Result<(), ProvisionError>;
}

/// Create, configure and start the machine described by `spec` from the
/// cached `system_image`. The provisioning disc must already exist.
pub fn provision<H: Hypervisor + ?Sized>(
    hv: &H,
    spec: &MachineSpec,
    system_image: &Path,
) -> Result<(), ProvisionError> {
    let name = spec.name.as_str();
    if let Some(parent) = spec.disk_path.parent() {
        fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
    }

    debug!("creating system disk {}", spec.disk_path.display());
    hv.create_system_disk(system_image, &spec.disk_path)?;
    hv.resize_disk(&spec.disk_path, spec.disk_size_bytes)?;

    info!("creating machine {name} (generation {})", spec.generation.number());
    hv.create_machine(spec)?;
    hv.set_processor(name, spec.cpus)?;
    hv.set_memory(name, spec.memory_bytes)?;
    hv.set_firmware(name, spec.generation)?;
    hv.attach_dvd(name, &spec.provisioning_disc_path())?;
    hv.set_identity(name, &spec.identity)?;
    hv.connect_network(name, &spec.network)?;

    if let Some(pipe) = &spec.serial_port_path {
        hv.set_serial_port(name, pipe)?;
    }
    if let Some(checkpoint) = &spec.checkpoint {
        hv.checkpoint(name, checkpoint)?;
    }

    info!("starting {name}");
    hv.start_machine(name)
}

/// Tear down a previous machine called `name` together with its disks.
///
/// Without `force` the user is asked first; declining aborts the run. Returns
/// whether a machine was removed.
pub fn cleanup_existing<H, F>(hv: &H, name: &str, force: bool, confirm: F) -> Result<bool, ProvisionError>
where
    H: Hypervisor + ?Sized,
    F: FnOnce(&str) -> Result<bool, ProvisionError>,
{
    if !hv.machine_exists(name)? {
        return Ok(false);
    }

    if !force && !confirm(&format!("Machine '{name}' already exists. Remove it and its disks?"))? {
        return Err(ProvisionError::InvalidInput(format!(
            "machine '{name}' already exists; rerun with --force to replace it"
        )));
    }

    info!("removing existing machine {name}");
    hv.stop_machine(name)?;
    let disks = hv.attached_disks(name)?;
    hv.remove_machine(name)?;

    for disk in disks {
        match fs::remove_file(&disk) {
            Ok(()) => debug!("deleted {}", disk.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("disk {} of {name} was already gone", disk.display());
            }
            Err(e) => {
                return Err(ProvisionError::Io {
                    context: format!("delete {}", disk.display()),
                    source: e,
                });
            }
        }
    }
    Ok(true)
}
