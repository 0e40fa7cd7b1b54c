use std::path::PathBuf;

/// Azure's well-known chassis asset tag; cloud-init's Azure datasource only
/// activates when it finds this value in SMBIOS.
pub const AZURE_CHASSIS_ASSET_TAG: &str = "7783-7084-3265-9085-8269-3286-77";

/// Hyper-V machine generation, which also selects the firmware type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// BIOS firmware, IDE boot devices.
    Gen1,
    /// UEFI firmware, SCSI boot devices.
    Gen2,
}

impl Generation {
    pub fn number(&self) -> u8 {
        match self {
            Generation::Gen1 => 1,
            Generation::Gen2 => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Generation::Gen1),
            2 => Some(Generation::Gen2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub switch_name: String,
    pub static_mac: Option<String>,
    pub vlan_id: Option<u16>,
}

/// SMBIOS identity fields some guest agents inspect to recognize the
/// provisioning environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareIdentity {
    pub serial_number: String,
    pub chassis_asset_tag: Option<String>,
}

/// Identity and hardware configuration of the machine being provisioned.
#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub name: String,
    pub cpus: u32,
    pub memory_bytes: u64,
    /// Parent directory handed to Hyper-V; the machine's files live in
    /// `<vm_dir>/<name>/`.
    pub vm_dir: PathBuf,
    pub disk_path: PathBuf,
    pub disk_size_bytes: u64,
    pub generation: Generation,
    pub network: NetworkAttachment,
    pub serial_port_path: Option<String>,
    pub identity: HardwareIdentity,
    pub checkpoint: Option<String>,
}

impl MachineSpec {
    pub fn machine_dir(&self) -> PathBuf {
        self.vm_dir.join(&self.name)
    }

    /// Where the provisioning disc for this machine is written.
    pub fn provisioning_disc_path(&self) -> PathBuf {
        self.machine_dir().join(format!("{}-metadata.iso", self.name))
    }
}
