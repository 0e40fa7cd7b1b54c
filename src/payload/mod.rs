//! Renders the documents the guest's first-boot agent reads from the
//! provisioning disc.

pub mod azure;
pub mod network;
pub mod template;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use self::azure::{OvfEnvironment, render_ovf_env};
use self::network::{NetConfigFormat, NetworkMode, render_eni, render_network_config};
use self::template::{render, yaml_list, yaml_str};
use crate::cloud::{Protocol, ProvisioningPayload};
use crate::error::{IoContext, ProvisionError};

/// Caller-facing values available to templates as `{{ name }}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadParams {
    pub instance_id: String,
    pub hostname: String,
    pub domain: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub ssh_authorized_keys: Vec<String>,
    pub timezone: String,
    pub locale: String,
    pub packages: Vec<String>,
}

impl PayloadParams {
    pub fn fqdn(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}.{domain}", self.hostname),
            None => self.hostname.clone(),
        }
    }

    /// Placeholder values, already rendered as YAML scalars.
    pub fn placeholders(&self) -> BTreeMap<&'static str, String> {
        let has_password = self.password.is_some();
        BTreeMap::from([
            ("instance_id", yaml_str(&self.instance_id)),
            ("hostname", yaml_str(&self.hostname)),
            ("fqdn", yaml_str(&self.fqdn())),
            ("username", yaml_str(&self.username)),
            ("password", yaml_str(self.password.as_deref().unwrap_or_default())),
            ("ssh_authorized_keys", yaml_list(&self.ssh_authorized_keys)),
            ("timezone", yaml_str(&self.timezone)),
            ("locale", yaml_str(&self.locale)),
            ("packages", yaml_list(&self.packages)),
            ("lock_passwd", (!has_password).to_string()),
            ("ssh_pwauth", has_password.to_string()),
        ])
    }
}

/// Built-in user-data, or the caller's template when it exists.
fn user_data_template(params: &PayloadParams, custom: Option<&Path>) -> Result<String, ProvisionError> {
    if let Some(path) = custom {
        if path.is_file() {
            debug!("using user-data template {}", path.display());
            return fs::read_to_string(path).io_context(|| format!("read {}", path.display()));
        }
        warn!("user-data template {} not found; using the built-in template", path.display());
    }

    let mut template = template::USER_DATA.to_string();
    if params.password.is_some() {
        template.push_str(template::USER_DATA_PASSWORD);
    }
    Ok(template)
}

/// Render every document the guest needs for `protocol`.
pub fn build_payload(
    params: &PayloadParams,
    network: &NetworkMode,
    protocol: Protocol,
    custom_user_data: Option<&Path>,
) -> Result<ProvisioningPayload, ProvisionError> {
    let values = params.placeholders();

    let user_data = render(&user_data_template(params, custom_user_data)?, &values);
    let mut meta_data = render(template::META_DATA, &values);
    let mut network_config = None;

    if let NetworkMode::Static(net) = network {
        if protocol == Protocol::Azure {
            return Err(ProvisionError::InvalidInput(
                "static networking needs the NoCloud disc; add --nocloud or use a generic image".to_string(),
            ));
        }
        match net.format {
            NetConfigFormat::Eni => meta_data.push_str(&render_eni(net)),
            _ => network_config = render_network_config(net),
        }
    }

    let provider_env = match protocol {
        Protocol::NoCloud => None,
        Protocol::Azure => Some(render_ovf_env(&OvfEnvironment {
            hostname: &params.hostname,
            username: &params.username,
            password: params.password.as_deref(),
            ssh_authorized_keys: &params.ssh_authorized_keys,
            custom_data: &user_data,
        })),
    };

    Ok(ProvisioningPayload {
        meta_data,
        user_data,
        network_config,
        provider_env,
    })
}

#[cfg(test)]
mod tests {
    use super::network::StaticNetwork;
    use super::*;

    fn params() -> PayloadParams {
        PayloadParams {
            instance_id: "iid-web01".to_string(),
            hostname: "web01".to_string(),
            domain: Some("lab.local".to_string()),
            username: "ubuntu".to_string(),
            password: None,
            ssh_authorized_keys: vec!["ssh-ed25519 AAAA me@host".to_string()],
            timezone: "UTC".to_string(),
            locale: "en_US.UTF-8".to_string(),
            packages: vec!["linux-virtual".to_string()],
        }
    }

    fn static_net(format: NetConfigFormat) -> NetworkMode {
        NetworkMode::Static(StaticNetwork {
            interface: "eth0".to_string(),
            address: Some("10.0.0.5/24".parse().unwrap()),
            gateway: Some("10.0.0.1".parse().unwrap()),
            nameservers: vec!["10.0.0.1".to_string()],
            search: vec![],
            mac_address: None,
            format,
        })
    }

    #[test]
    fn nocloud_dhcp_payload() {
        let payload = build_payload(&params(), &NetworkMode::Dhcp, Protocol::NoCloud, None).unwrap();

        assert_eq!(payload.meta_data, "instance-id: \"iid-web01\"\nlocal-hostname: \"web01\"\n");
        assert!(payload.user_data.starts_with("#cloud-config\n"));
        assert!(payload.user_data.contains("fqdn: \"web01.lab.local\"\n"));
        assert!(payload.user_data.contains("    lock_passwd: true\n"));
        assert!(payload.user_data.contains("ssh_pwauth: false\n"));
        assert!(payload.user_data.contains("    ssh_authorized_keys: [\"ssh-ed25519 AAAA me@host\"]\n"));
        assert!(payload.user_data.contains("packages: [\"linux-virtual\"]\n"));
        assert!(!payload.user_data.contains("chpasswd"));
        assert!(!payload.user_data.contains("{{"));
        assert_eq!(payload.network_config, None);
        assert_eq!(payload.provider_env, None);
    }

    #[test]
    fn password_enables_chpasswd_and_pwauth() {
        let mut p = params();
        p.password = Some("s3cret".to_string());
        let payload = build_payload(&p, &NetworkMode::Dhcp, Protocol::NoCloud, None).unwrap();
        assert!(payload.user_data.contains("      password: \"s3cret\"\n"));
        assert!(payload.user_data.contains("ssh_pwauth: true\n"));
        assert!(payload.user_data.contains("    lock_passwd: false\n"));
    }

    #[test]
    fn static_network_v2_and_eni() {
        let v2 = build_payload(&params(), &static_net(NetConfigFormat::V2), Protocol::NoCloud, None).unwrap();
        assert!(v2.network_config.unwrap().starts_with("version: 2\n"));

        let eni = build_payload(&params(), &static_net(NetConfigFormat::Eni), Protocol::NoCloud, None).unwrap();
        assert_eq!(eni.network_config, None);
        assert!(eni.meta_data.contains("network-interfaces: |\n  auto eth0\n"));
    }

    #[test]
    fn azure_payload_embeds_user_data() {
        let payload = build_payload(&params(), &NetworkMode::Dhcp, Protocol::Azure, None).unwrap();
        let env = payload.provider_env.unwrap();
        assert!(env.contains("<UserName>ubuntu</UserName>"));
        assert!(env.contains("<CustomData>"));

        let err = build_payload(&params(), &static_net(NetConfigFormat::V2), Protocol::Azure, None).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidInput(_)));
    }

    #[test]
    fn custom_template_is_rendered_with_the_same_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user-data.tpl");
        fs::write(&path, "#cloud-config\nhostname: {{ hostname }}\nextra: {{ unknown }}\n").unwrap();

        let payload = build_payload(&params(), &NetworkMode::Dhcp, Protocol::NoCloud, Some(&path)).unwrap();
        assert_eq!(payload.user_data, "#cloud-config\nhostname: \"web01\"\nextra: {{ unknown }}\n");
    }

    #[test]
    fn missing_custom_template_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.tpl");

        let fallback = build_payload(&params(), &NetworkMode::Dhcp, Protocol::NoCloud, Some(&missing)).unwrap();
        let builtin = build_payload(&params(), &NetworkMode::Dhcp, Protocol::NoCloud, None).unwrap();
        assert_eq!(fallback, builtin);
    }
}
