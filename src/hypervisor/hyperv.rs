use std::path::{Path, PathBuf};

use super::Hypervisor;
use super::powershell::{PowerShell, quote};
use crate::cloud::{Generation, HardwareIdentity, MachineSpec, NetworkAttachment};
use crate::error::ProvisionError;

const VIRTUALIZATION_NAMESPACE: &str = r"root\virtualization\v2";
const UEFI_CA_TEMPLATE: &str = "MicrosoftUEFICertificateAuthority";

/// Hyper-V through its PowerShell module.
#[derive(Debug, Clone, Default)]
pub struct HyperV {
    shell: PowerShell,
}

impl HyperV {
    pub fn new(shell: PowerShell) -> Self {
        Self { shell }
    }

    fn exec(&self, operation: &str, script: &str) -> Result<(), ProvisionError> {
        self.shell.invoke(operation, script).map(drop)
    }
}

impl Hypervisor for HyperV {
    fn machine_exists(&self, name: &str) -> Result<bool, ProvisionError> {
        let out = self.shell.invoke(
            "Get-VM",
            &format!("[bool](Get-VM -Name {} -ErrorAction SilentlyContinue)", quote(name)),
        )?;
        Ok(out.eq_ignore_ascii_case("true"))
    }

    fn attached_disks(&self, name: &str) -> Result<Vec<PathBuf>, ProvisionError> {
        let out = self.shell.invoke(
            "Get-VMHardDiskDrive",
            &format!("Get-VMHardDiskDrive -VMName {} | ForEach-Object {{ $_.Path }}", quote(name)),
        )?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    fn stop_machine(&self, name: &str) -> Result<(), ProvisionError> {
        self.exec(
            "Stop-VM",
            &format!(
                "Get-VM -Name {} | Where-Object State -ne 'Off' | Stop-VM -TurnOff -Force",
                quote(name)
            ),
        )
    }

    fn remove_machine(&self, name: &str) -> Result<(), ProvisionError> {
        self.exec("Remove-VM", &format!("Remove-VM -Name {} -Force", quote(name)))
    }

    fn create_system_disk(&self, source: &Path, dest: &Path) -> Result<(), ProvisionError> {
        self.exec(
            "Convert-VHD",
            &format!(
                "Convert-VHD -Path {} -DestinationPath {} -VHDType Dynamic",
                quote(source.to_string_lossy()),
                quote(dest.to_string_lossy())
            ),
        )
    }

    fn resize_disk(&self, disk: &Path, size_bytes: u64) -> Result<(), ProvisionError> {
        self.exec("Resize-VHD", &resize_script(disk, size_bytes))
    }

    fn create_machine(&self, spec: &MachineSpec) -> Result<(), ProvisionError> {
        self.exec("New-VM", &new_vm_script(spec))
    }

    fn set_processor(&self, name: &str, cpus: u32) -> Result<(), ProvisionError> {
        self.exec("Set-VMProcessor", &format!("Set-VMProcessor -VMName {} -Count {cpus}", quote(name)))
    }

    fn set_memory(&self, name: &str, bytes: u64) -> Result<(), ProvisionError> {
        self.exec(
            "Set-VMMemory",
            &format!(
                "Set-VMMemory -VMName {} -DynamicMemoryEnabled $false -StartupBytes {bytes}",
                quote(name)
            ),
        )
    }

    fn set_firmware(&self, name: &str, generation: Generation) -> Result<(), ProvisionError> {
        match firmware_script(name, generation) {
            Some(script) => self.exec("Set-VMFirmware", &script),
            None => Ok(()),
        }
    }

    fn attach_dvd(&self, name: &str, iso: &Path) -> Result<(), ProvisionError> {
        self.exec(
            "Add-VMDvdDrive",
            &format!("Add-VMDvdDrive -VMName {} -Path {}", quote(name), quote(iso.to_string_lossy())),
        )
    }

    fn set_identity(&self, name: &str, identity: &HardwareIdentity) -> Result<(), ProvisionError> {
        self.exec("ModifySystemSettings", &identity_script(name, identity))
    }

    fn connect_network(&self, name: &str, network: &NetworkAttachment) -> Result<(), ProvisionError> {
        self.exec("Connect-VMNetworkAdapter", &network_script(name, network))
    }

    fn set_serial_port(&self, name: &str, pipe: &str) -> Result<(), ProvisionError> {
        self.exec(
            "Set-VMComPort",
            &format!("Set-VMComPort -VMName {} -Number 1 -Path {}", quote(name), quote(pipe)),
        )
    }

    fn checkpoint(&self, name: &str, checkpoint_name: &str) -> Result<(), ProvisionError> {
        self.exec(
            "Checkpoint-VM",
            &format!("Checkpoint-VM -Name {} -SnapshotName {}", quote(name), quote(checkpoint_name)),
        )
    }

    fn start_machine(&self, name: &str) -> Result<(), ProvisionError> {
        self.exec("Start-VM", &format!("Start-VM -Name {}", quote(name)))
    }
}

fn resize_script(disk: &Path, size_bytes: u64) -> String {
    let disk = quote(disk.to_string_lossy());
    format!("if ((Get-VHD -Path {disk}).Size -lt {size_bytes}) {{ Resize-VHD -Path {disk} -SizeBytes {size_bytes} }}")
}

fn new_vm_script(spec: &MachineSpec) -> String {
    format!(
        "New-VM -Name {} -Generation {} -MemoryStartupBytes {} -VHDPath {} -Path {} | Out-Null",
        quote(&spec.name),
        spec.generation.number(),
        spec.memory_bytes,
        quote(spec.disk_path.to_string_lossy()),
        quote(spec.vm_dir.to_string_lossy())
    )
}

/// Gen2 boots from the system disk with the third-party UEFI CA template,
/// which Linux shims are signed with. Gen1 BIOS needs nothing.
fn firmware_script(name: &str, generation: Generation) -> Option<String> {
    match generation {
        Generation::Gen1 => None,
        Generation::Gen2 => {
            let name = quote(name);
            Some(format!(
                "Set-VMFirmware -VMName {name} -EnableSecureBoot On -SecureBootTemplate '{UEFI_CA_TEMPLATE}' \
                 -FirstBootDevice (Get-VMHardDiskDrive -VMName {name} | Select-Object -First 1)"
            ))
        }
    }
}

/// SMBIOS fields are only writable through the management service.
fn identity_script(name: &str, identity: &HardwareIdentity) -> String {
    let filter = quote(format!("ElementName='{}'", name.replace('\'', "\\'")));
    let serial = quote(&identity.serial_number);
    let mut script = format!(
        "$ns = '{VIRTUALIZATION_NAMESPACE}'; \
         $vsms = Get-WmiObject -Namespace $ns -Class Msvm_VirtualSystemManagementService; \
         $vm = Get-WmiObject -Namespace $ns -Class Msvm_ComputerSystem -Filter {filter}; \
         $data = $vm.GetRelated('Msvm_VirtualSystemSettingData') | \
         Where-Object {{ $_.VirtualSystemType -eq 'Microsoft:Hyper-V:System:Realized' }}; \
         $data.BIOSSerialNumber = {serial}; \
         $data.ChassisSerialNumber = {serial}; "
    );
    if let Some(tag) = &identity.chassis_asset_tag {
        script.push_str(&format!("$data.ChassisAssetTag = {}; ", quote(tag)));
    }
    script.push_str(
        "$result = $vsms.ModifySystemSettings($data.GetText(1)); \
         if ($result.ReturnValue -notin 0, 4096) { throw \"ModifySystemSettings returned $($result.ReturnValue)\" }",
    );
    script
}

fn network_script(name: &str, network: &NetworkAttachment) -> String {
    let name = quote(name);
    let mut parts = vec![format!(
        "Connect-VMNetworkAdapter -VMName {name} -SwitchName {}",
        quote(&network.switch_name)
    )];
    if let Some(mac) = &network.static_mac {
        parts.push(format!("Set-VMNetworkAdapter -VMName {name} -StaticMacAddress {}", quote(mac)));
    }
    if let Some(vlan) = network.vlan_id {
        parts.push(format!("Set-VMNetworkAdapterVlan -VMName {name} -Access -VlanId {vlan}"));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::AZURE_CHASSIS_ASSET_TAG;

    #[test]
    fn gen2_firmware_uses_uefi_ca_template() {
        assert!(firmware_script("vm", Generation::Gen1).is_none());
        let script = firmware_script("vm", Generation::Gen2).unwrap();
        assert!(script.starts_with("Set-VMFirmware -VMName 'vm' -EnableSecureBoot On"));
        assert!(script.contains("-SecureBootTemplate 'MicrosoftUEFICertificateAuthority'"));
    }

    #[test]
    fn identity_sets_serials_and_optional_asset_tag() {
        let plain = identity_script(
            "o'brien",
            &HardwareIdentity {
                serial_number: "ds=nocloud".to_string(),
                chassis_asset_tag: None,
            },
        );
        assert!(plain.contains(r"-Filter 'ElementName=''o\''brien'''"));
        assert!(plain.contains("$data.BIOSSerialNumber = 'ds=nocloud';"));
        assert!(plain.contains("$data.ChassisSerialNumber = 'ds=nocloud';"));
        assert!(!plain.contains("ChassisAssetTag"));

        let azure = identity_script(
            "vm",
            &HardwareIdentity {
                serial_number: "0000-1111".to_string(),
                chassis_asset_tag: Some(AZURE_CHASSIS_ASSET_TAG.to_string()),
            },
        );
        assert!(azure.contains("$data.ChassisAssetTag = '7783-7084-3265-9085-8269-3286-77';"));
        assert!(azure.ends_with("}"));
    }

    #[test]
    fn network_adds_mac_and_vlan_only_when_set() {
        let mut net = NetworkAttachment {
            switch_name: "Default Switch".to_string(),
            static_mac: None,
            vlan_id: None,
        };
        assert_eq!(
            network_script("vm", &net),
            "Connect-VMNetworkAdapter -VMName 'vm' -SwitchName 'Default Switch'"
        );

        net.static_mac = Some("00155D010203".to_string());
        net.vlan_id = Some(42);
        let script = network_script("vm", &net);
        assert!(script.contains("; Set-VMNetworkAdapter -VMName 'vm' -StaticMacAddress '00155D010203'"));
        assert!(script.ends_with("; Set-VMNetworkAdapterVlan -VMName 'vm' -Access -VlanId 42"));
    }

    #[test]
    fn new_vm_points_at_disk_and_directory() {
        let spec = MachineSpec {
            name: "vm".to_string(),
            cpus: 1,
            memory_bytes: 1024 * 1024 * 1024,
            vm_dir: PathBuf::from("/vms"),
            disk_path: PathBuf::from("/vms/vm/vm.vhdx"),
            disk_size_bytes: 0,
            generation: Generation::Gen1,
            network: NetworkAttachment {
                switch_name: "s".to_string(),
                static_mac: None,
                vlan_id: None,
            },
            serial_port_path: None,
            identity: HardwareIdentity {
                serial_number: "x".to_string(),
                chassis_asset_tag: None,
            },
            checkpoint: None,
        };
        assert_eq!(
            new_vm_script(&spec),
            "New-VM -Name 'vm' -Generation 1 -MemoryStartupBytes 1073741824 -VHDPath '/vms/vm/vm.vhdx' -Path '/vms' | Out-Null"
        );
        assert_eq!(
            resize_script(Path::new("/d.vhdx"), 10),
            "if ((Get-VHD -Path '/d.vhdx').Size -lt 10) { Resize-VHD -Path '/d.vhdx' -SizeBytes 10 }"
        );
    }
}
