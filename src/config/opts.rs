use std::path::PathBuf;

use clap::{Args, Parser};

use super::defaults::*;
use crate::hypervisor::powershell::DEFAULT_POWERSHELL;
use crate::payload::network::NetConfigFormat;

/// Provision a Linux VM on Hyper-V from an Ubuntu or Debian cloud image.
#[derive(Parser, Debug, Clone)]
#[command(name = "cloud-vm-provisioner", version, about)]
pub struct ProvisionOpts {
    /// Image to deploy, eg. 22.04, jammy, 12 or bookworm-azure. Prompts when omitted.
    #[arg(long, short = 'i')]
    pub image_version: Option<String>,

    #[command(flatten)]
    pub machine: MachineOpts,

    #[command(flatten)]
    pub credentials: CredentialOpts,

    #[command(flatten)]
    pub network: NetworkOpts,

    #[command(flatten)]
    pub cache: CacheOpts,

    /// Disc authoring program (genisoimage, mkisofs, xorriso or oscdimg)
    #[arg(long)]
    pub authoring_tool: Option<PathBuf>,

    /// PowerShell executable used for Hyper-V
    #[arg(long, default_value = DEFAULT_POWERSHELL)]
    pub powershell: String,

    /// Replace an existing machine of the same name without asking
    #[arg(long, short = 'f')]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MachineOpts {
    /// Machine name
    #[arg(long, short = 'n')]
    pub name: String,

    #[arg(long, default_value_t = DEFAULT_CPUS)]
    pub cpus: u32,

    #[arg(long, default_value = DEFAULT_MEMORY, help = "Memory size (e.g. 4G, 2048M, or plain number for MB)")]
    pub memory: String,

    #[arg(long, default_value = DEFAULT_DISK_SIZE, help = "System disk size (e.g. 40G, 1T, or plain number for bytes)")]
    pub disk_size: String,

    /// Hyper-V generation: 1 (BIOS) or 2 (UEFI)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub generation: u8,

    /// Virtual switch to connect to
    #[arg(long, default_value = DEFAULT_SWITCH)]
    pub switch: String,

    /// Static MAC address, eg. 00:15:5D:01:02:03
    #[arg(long)]
    pub mac_address: Option<String>,

    #[arg(long)]
    pub vlan_id: Option<u16>,

    /// Parent directory for the machine's files
    #[arg(long)]
    pub vm_dir: Option<PathBuf>,

    /// Take a checkpoint with this name before first boot
    #[arg(long)]
    pub checkpoint: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CredentialOpts {
    /// Login user; defaults to the distribution's cloud user
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    #[arg(long, short = 'p')]
    pub password: Option<String>,

    /// Authorized public key (repeatable)
    #[arg(long = "ssh-key")]
    pub ssh_keys: Vec<String>,

    /// File with authorized public keys, one per line (repeatable)
    #[arg(long = "ssh-key-file")]
    pub ssh_key_files: Vec<PathBuf>,

    /// Guest hostname; defaults to the machine name
    #[arg(long)]
    pub hostname: Option<String>,

    /// DNS domain appended to the hostname for the FQDN
    #[arg(long)]
    pub domain: Option<String>,

    #[arg(long, default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    #[arg(long, default_value = DEFAULT_LOCALE)]
    pub locale: String,

    /// Extra package to install on first boot (repeatable)
    #[arg(long = "package")]
    pub packages: Vec<String>,

    /// cloud-config template replacing the built-in user-data
    #[arg(long)]
    pub user_data_template: Option<PathBuf>,
}

/// Static addressing. Setting any field switches the machine from DHCP to a
/// static configuration built from all of them.
#[derive(Args, Debug, Clone)]
pub struct NetworkOpts {
    /// Address with prefix, eg. 192.168.10.5/24
    #[arg(long)]
    pub ip_address: Option<String>,

    #[arg(long)]
    pub gateway: Option<String>,

    /// Name servers, comma separated or repeated
    #[arg(long, value_delimiter = ',')]
    pub dns: Vec<String>,

    /// Search domains, comma separated or repeated
    #[arg(long, value_delimiter = ',')]
    pub dns_search: Vec<String>,

    /// Guest interface name
    #[arg(long, default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Static network rendering: v1, v2 or eni
    #[arg(long, default_value_t = NetConfigFormat::V2)]
    pub net_config: NetConfigFormat,
}

impl NetworkOpts {
    pub fn wants_static(&self) -> bool {
        self.ip_address.is_some() || self.gateway.is_some() || !self.dns.is_empty() || !self.dns_search.is_empty()
    }
}

#[derive(Args, Debug, Clone)]
pub struct CacheOpts {
    /// Image cache root
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Reuse the cached image without asking the mirror for a newer one
    #[arg(long)]
    pub no_update_check: bool,

    /// Delete the downloaded archive once converted
    #[arg(long)]
    pub prune_archive: bool,

    /// Boot Azure images through the NoCloud datasource
    #[arg(long)]
    pub nocloud: bool,

    /// HTTP(S) proxy for image downloads
    #[arg(long)]
    pub proxy: Option<String>,
}
