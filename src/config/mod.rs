//! Turns command line options into the explicit settings each pipeline stage
//! consumes.

pub mod defaults;
mod opts;

use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::warn;

pub use self::opts::{CacheOpts, CredentialOpts, MachineOpts, NetworkOpts, ProvisionOpts};

use self::defaults::distro_defaults;
use crate::cache::{CacheOptions, default_cache_root};
use crate::cloud::{
    AZURE_CHASSIS_ASSET_TAG, Distribution, Generation, HardwareIdentity, ImageSpec, MachineSpec, NetworkAttachment,
    Protocol,
};
use crate::error::{IoContext, ProvisionError};
use crate::helpers::choose_one;
use crate::helpers::units::{parse_memory, parse_size};
use crate::payload::PayloadParams;
use crate::payload::network::{Cidr, NetworkMode, StaticNetwork};
use crate::repositories::Catalog;

/// SMBIOS serial that makes cloud-init's ds-identify pick NoCloud.
pub const NOCLOUD_SERIAL: &str = "ds=nocloud";

/// Everything a run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub image: ImageSpec,
    pub machine: MachineSpec,
    pub payload: PayloadParams,
    pub network: NetworkMode,
    pub user_data_template: Option<PathBuf>,
    pub cache_root: PathBuf,
    pub cache: CacheOptions,
    pub proxy: Option<String>,
    pub authoring_tool: Option<PathBuf>,
    pub powershell: String,
    pub force: bool,
}

/// Image identifier from the command line, else picked interactively.
pub fn image_identifier(opts: &ProvisionOpts, catalog: &Catalog) -> Result<String, ProvisionError> {
    match &opts.image_version {
        Some(id) => Ok(id.clone()),
        None => choose_one("Select image", catalog.identifiers()),
    }
}

pub fn resolve(opts: &ProvisionOpts, image: ImageSpec) -> Result<ResolvedConfig, ProvisionError> {
    resolve_at(opts, image, Utc::now())
}

/// [`resolve`] with a fixed clock for the instance id.
pub fn resolve_at(opts: &ProvisionOpts, image: ImageSpec, now: DateTime<Utc>) -> Result<ResolvedConfig, ProvisionError> {
    let protocol = if opts.cache.nocloud {
        Protocol::NoCloud
    } else {
        image.protocol()
    };

    let instance_id = format!("iid-{}-{}", opts.machine.name, now.format("%Y%m%d%H%M%S"));
    let identity = match protocol {
        Protocol::NoCloud => HardwareIdentity {
            serial_number: NOCLOUD_SERIAL.to_string(),
            chassis_asset_tag: None,
        },
        Protocol::Azure => HardwareIdentity {
            serial_number: instance_id.clone(),
            chassis_asset_tag: Some(AZURE_CHASSIS_ASSET_TAG.to_string()),
        },
    };

    let mac = opts.machine.mac_address.as_deref().map(normalize_mac).transpose()?;
    let machine = resolve_machine(&opts.machine, mac.as_ref().map(|m| m.hyperv.clone()), identity)?;
    let network = resolve_network(&opts.network, mac.map(|m| m.guest))?;
    if protocol == Protocol::Azure && matches!(network, NetworkMode::Static(_)) {
        return Err(ProvisionError::InvalidInput(
            "static networking needs the NoCloud disc; add --nocloud or use a generic image".to_string(),
        ));
    }
    let payload = resolve_payload(&opts.credentials, image.distribution(), &machine.name, instance_id)?;

    Ok(ResolvedConfig {
        machine,
        payload,
        network,
        user_data_template: opts.credentials.user_data_template.clone(),
        cache_root: opts.cache.cache_dir.clone().unwrap_or_else(default_cache_root),
        cache: CacheOptions {
            check_for_update: !opts.cache.no_update_check,
            nocloud: opts.cache.nocloud,
            prune_archive: opts.cache.prune_archive,
        },
        proxy: opts.cache.proxy.clone(),
        authoring_tool: opts.authoring_tool.clone(),
        powershell: opts.powershell.clone(),
        force: opts.force,
        image,
    })
}

/// Parent directory for machine files when `--vm-dir` is not given.
pub fn default_vm_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cloud-vm-provisioner")
        .join("machines")
}

fn resolve_machine(
    opts: &MachineOpts,
    static_mac: Option<String>,
    identity: HardwareIdentity,
) -> Result<MachineSpec, ProvisionError> {
    let name = opts.name.trim().to_string();
    if name.is_empty() || name.contains(['/', '\\', '\'', '"']) {
        return Err(ProvisionError::InvalidInput(format!("invalid machine name '{}'", opts.name)));
    }
    if opts.cpus == 0 {
        return Err(ProvisionError::InvalidInput("--cpus must be at least 1".to_string()));
    }
    let generation = Generation::from_number(opts.generation)
        .ok_or_else(|| ProvisionError::InvalidInput(format!("unsupported generation {}", opts.generation)))?;

    let vm_dir = opts.vm_dir.clone().unwrap_or_else(default_vm_root);
    let disk_path = vm_dir.join(&name).join(format!("{name}.vhdx"));

    Ok(MachineSpec {
        cpus: opts.cpus,
        memory_bytes: parse_memory(&opts.memory)?,
        disk_size_bytes: parse_size(&opts.disk_size)?,
        generation,
        network: NetworkAttachment {
            switch_name: opts.switch.clone(),
            static_mac,
            vlan_id: opts.vlan_id,
        },
        serial_port_path: Some(format!(r"\\.\pipe\{name}-com1")),
        identity,
        checkpoint: opts.checkpoint.clone(),
        vm_dir,
        disk_path,
        name,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MacAddress {
    /// `00155D010203`, as Hyper-V wants it.
    hyperv: String,
    /// `00:15:5d:01:02:03`, as cloud-init matches it.
    guest: String,
}

fn normalize_mac(raw: &str) -> Result<MacAddress, ProvisionError> {
    let hex: String = raw.chars().filter(|c| !matches!(c, ':' | '-' | '.')).collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProvisionError::InvalidInput(format!("invalid MAC address '{raw}'")));
    }
    let lower = hex.to_ascii_lowercase();
    let guest = lower
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":");
    Ok(MacAddress {
        hyperv: hex.to_ascii_uppercase(),
        guest,
    })
}

fn resolve_network(opts: &NetworkOpts, guest_mac: Option<String>) -> Result<NetworkMode, ProvisionError> {
    if !opts.wants_static() {
        return Ok(NetworkMode::Dhcp);
    }

    let address: Option<Cidr> = opts.ip_address.as_deref().map(str::parse::<Cidr>).transpose()?;
    let gateway = opts
        .gateway
        .as_deref()
        .map(|raw| {
            raw.parse::<IpAddr>()
                .map_err(|_| ProvisionError::InvalidInput(format!("invalid gateway '{raw}'")))
        })
        .transpose()?;
    for server in &opts.dns {
        server
            .parse::<IpAddr>()
            .map_err(|_| ProvisionError::InvalidInput(format!("invalid DNS server '{server}'")))?;
    }

    // Any one field turns automatic configuration off for all of them.
    let missing: Vec<&str> = [
        ("--ip-address", address.is_none()),
        ("--gateway", gateway.is_none()),
        ("--dns", opts.dns.is_empty()),
    ]
    .into_iter()
    .filter_map(|(flag, absent)| absent.then_some(flag))
    .collect();
    if !missing.is_empty() {
        warn!("static network without {}; those settings are left out", missing.join(", "));
    }

    Ok(NetworkMode::Static(StaticNetwork {
        interface: opts.interface.clone(),
        address,
        gateway,
        nameservers: opts.dns.clone(),
        search: opts.dns_search.clone(),
        mac_address: guest_mac,
        format: opts.net_config,
    }))
}

fn resolve_payload(
    opts: &CredentialOpts,
    distribution: Distribution,
    machine_name: &str,
    instance_id: String,
) -> Result<PayloadParams, ProvisionError> {
    let defaults = distro_defaults(distribution);

    let mut keys: Vec<String> = opts.ssh_keys.iter().map(|k| k.trim().to_string()).collect();
    for path in &opts.ssh_key_files {
        let text = fs::read_to_string(path)
            .io_context(|| format!("read SSH key file {}", path.display()))
            .map_err(|e| ProvisionError::InvalidInput(e.to_string()))?;
        keys.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    keys.retain(|k| !k.is_empty());
    keys.dedup();

    if opts.password.is_none() && keys.is_empty() {
        return Err(ProvisionError::InvalidInput(
            "no way to log in: pass --password, --ssh-key or --ssh-key-file".to_string(),
        ));
    }

    let mut packages: Vec<String> = defaults.guest_packages.iter().map(|p| p.to_string()).collect();
    for package in &opts.packages {
        if !packages.contains(package) {
            packages.push(package.clone());
        }
    }

    Ok(PayloadParams {
        instance_id,
        hostname: opts.hostname.clone().unwrap_or_else(|| machine_name.to_string()),
        domain: opts.domain.clone(),
        username: opts.username.clone().unwrap_or_else(|| defaults.username.to_string()),
        password: opts.password.clone(),
        ssh_authorized_keys: keys,
        timezone: opts.timezone.clone(),
        locale: opts.locale.clone(),
        packages,
    })
}
