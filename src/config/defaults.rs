use crate::cloud::Distribution;

pub const DEFAULT_CPUS: u32 = 2;
pub const DEFAULT_MEMORY: &str = "2G";
pub const DEFAULT_DISK_SIZE: &str = "40G";
pub const DEFAULT_SWITCH: &str = "Default Switch";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_LOCALE: &str = "en_US.UTF-8";
pub const DEFAULT_INTERFACE: &str = "eth0";

/// Settings that differ between distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistroDefaults {
    pub username: &'static str,
    /// Hyper-V integration services for the guest.
    pub guest_packages: &'static [&'static str],
}

pub fn distro_defaults(distribution: Distribution) -> DistroDefaults {
    match distribution {
        Distribution::Ubuntu => DistroDefaults {
            username: "ubuntu",
            guest_packages: &["linux-virtual", "linux-cloud-tools-virtual", "linux-tools-virtual"],
        },
        Distribution::Debian => DistroDefaults {
            username: "debian",
            guest_packages: &["hyperv-daemons"],
        },
    }
}
