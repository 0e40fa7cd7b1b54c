use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Fields of the Azure Linux provisioning configuration set.
#[derive(Debug, Clone)]
pub struct OvfEnvironment<'a> {
    pub hostname: &'a str,
    pub username: &'a str,
    pub password: Option<&'a str>,
    pub ssh_authorized_keys: &'a [String],
    pub custom_data: &'a str,
}

pub fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Render `ovf-env.xml`. User-data travels base64-encoded as `CustomData`.
pub fn render_ovf_env(env: &OvfEnvironment<'_>) -> String {
    let username = xml_escape(env.username);
    let mut set = String::new();
    set.push_str("      <ConfigurationSetType>LinuxProvisioningConfiguration</ConfigurationSetType>\n");
    set.push_str(&format!("      <HostName>{}</HostName>\n", xml_escape(env.hostname)));
    set.push_str(&format!("      <UserName>{username}</UserName>\n"));
    if let Some(password) = env.password {
        set.push_str(&format!("      <UserPassword>{}</UserPassword>\n", xml_escape(password)));
    }
    set.push_str(&format!(
        "      <DisableSshPasswordAuthentication>{}</DisableSshPasswordAuthentication>\n",
        env.password.is_none()
    ));
    set.push_str(&format!("      <CustomData>{}</CustomData>\n", STANDARD.encode(env.custom_data)));
    if !env.ssh_authorized_keys.is_empty() {
        set.push_str("      <SSH>\n        <PublicKeys>\n");
        for key in env.ssh_authorized_keys {
            set.push_str("          <PublicKey>\n");
            set.push_str("            <Fingerprint></Fingerprint>\n");
            set.push_str(&format!(
                "            <Path>/home/{username}/.ssh/authorized_keys</Path>\n"
            ));
            set.push_str(&format!("            <Value>{}</Value>\n", xml_escape(key)));
            set.push_str("          </PublicKey>\n");
        }
        set.push_str("        </PublicKeys>\n      </SSH>\n");
    }

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<Environment xmlns="http://schemas.dmtf.org/ovf/environment/1" xmlns:oe="http://schemas.dmtf.org/ovf/environment/1" xmlns:wa="http://schemas.microsoft.com/windowsazure" xmlns:i="http://www.w3.org/2001/XMLSchema-instance">
  <wa:ProvisioningSection>
    <wa:Version>1.0</wa:Version>
    <LinuxProvisioningConfigurationSet xmlns="http://schemas.microsoft.com/windowsazure" xmlns:i="http://www.w3.org/2001/XMLSchema-instance">
{set}    </LinuxProvisioningConfigurationSet>
  </wa:ProvisioningSection>
  <wa:PlatformSettingsSection>
    <wa:Version>1.0</wa:Version>
    <PlatformSettings xmlns="http://schemas.microsoft.com/windowsazure" xmlns:i="http://www.w3.org/2001/XMLSchema-instance">
      <KmsServerHostname>kms.core.windows.net</KmsServerHostname>
      <ProvisionGuestAgent>false</ProvisionGuestAgent>
      <GuestAgentPackageName i:nil="true" />
      <PreprovisionedVm>false</PreprovisionedVm>
    </PlatformSettings>
  </wa:PlatformSettingsSection>
</Environment>
"#
    )
}
