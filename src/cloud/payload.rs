/// Documents exposed to the guest's first-boot agent through the provisioning
/// disc. Built fresh for every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningPayload {
    pub meta_data: String,
    pub user_data: String,
    pub network_config: Option<String>,
    /// Cloud-provider environment document (`ovf-env.xml` for Azure).
    pub provider_env: Option<String>,
}

impl ProvisioningPayload {
    /// File name of the cloud-provider environment document on the disc.
    pub const OVF_ENV_FILE: &'static str = "ovf-env.xml";
    pub const META_DATA_FILE: &'static str = "meta-data";
    pub const USER_DATA_FILE: &'static str = "user-data";
    pub const NETWORK_CONFIG_FILE: &'static str = "network-config";
}
