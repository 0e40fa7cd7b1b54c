use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::ProvisionError;

use super::template::yaml_list;

/// How a static network configuration is handed to cloud-init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetConfigFormat {
    /// `network-config` version 1.
    V1,
    /// `network-config` version 2 (netplan).
    #[default]
    V2,
    /// Debian `interfaces(5)` stanza inside meta-data.
    Eni,
}

impl FromStr for NetConfigFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            "eni" => Ok(Self::Eni),
            other => Err(format!("unknown network config format '{other}' (expected v1, v2 or eni)")),
        }
    }
}

impl fmt::Display for NetConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
            Self::Eni => "eni",
        })
    }
}

/// Address with prefix length, eg. `10.0.0.5/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl Cidr {
    /// Dotted netmask for IPv4, bare prefix length for IPv6.
    pub fn netmask(&self) -> String {
        match self.addr {
            IpAddr::V4(_) => {
                let bits = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                Ipv4Addr::from(bits).to_string()
            }
            IpAddr::V6(_) => self.prefix.to_string(),
        }
    }
}

impl FromStr for Cidr {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProvisionError::InvalidInput(format!("'{s}' is not an address with prefix (eg. 10.0.0.5/24)"));
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Static addressing for one interface. Every field the caller left out is
/// omitted from the rendered documents; automatic configuration stays off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticNetwork {
    pub interface: String,
    pub address: Option<Cidr>,
    pub gateway: Option<IpAddr>,
    pub nameservers: Vec<String>,
    pub search: Vec<String>,
    /// Guest-side MAC (`aa:bb:cc:dd:ee:ff`) to match the interface by.
    pub mac_address: Option<String>,
    pub format: NetConfigFormat,
}

impl StaticNetwork {
    /// Address family of the configuration; IPv4 unless an IPv6 address or
    /// gateway was given.
    fn is_ipv4(&self) -> bool {
        self.address
            .map(|a| a.addr)
            .or(self.gateway)
            .is_none_or(|addr| addr.is_ipv4())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    #[default]
    Dhcp,
    Static(StaticNetwork),
}

/// `network-config` document for the v1/v2 formats; `None` for ENI.
pub fn render_network_config(net: &StaticNetwork) -> Option<String> {
    match net.format {
        NetConfigFormat::V1 => Some(render_v1(net)),
        NetConfigFormat::V2 => Some(render_v2(net)),
        NetConfigFormat::Eni => None,
    }
}

fn render_v1(net: &StaticNetwork) -> String {
    let mut out = String::from("version: 1\nconfig:\n  - type: physical\n");
    out.push_str(&format!("    name: {}\n", net.interface));
    if let Some(mac) = &net.mac_address {
        out.push_str(&format!("    mac_address: \"{mac}\"\n"));
    }
    let kind = if net.is_ipv4() { "static" } else { "static6" };
    out.push_str(&format!("    subnets:\n      - type: {kind}\n"));
    if let Some(address) = &net.address {
        out.push_str(&format!("        address: {address}\n"));
    }
    if let Some(gateway) = &net.gateway {
        out.push_str(&format!("        gateway: {gateway}\n"));
    }
    if !net.nameservers.is_empty() {
        out.push_str(&format!("        dns_nameservers: {}\n", yaml_list(&net.nameservers)));
    }
    if !net.search.is_empty() {
        out.push_str(&format!("        dns_search: {}\n", yaml_list(&net.search)));
    }
    out
}

fn render_v2(net: &StaticNetwork) -> String {
    let mut out = String::from("version: 2\nethernets:\n");
    out.push_str(&format!("  {}:\n", net.interface));
    if let Some(mac) = &net.mac_address {
        out.push_str(&format!("    match:\n      macaddress: \"{mac}\"\n"));
        out.push_str(&format!("    set-name: {}\n", net.interface));
    }
    let dhcp = if net.is_ipv4() { "dhcp4" } else { "dhcp6" };
    out.push_str(&format!("    {dhcp}: false\n"));
    if let Some(address) = &net.address {
        out.push_str(&format!("    addresses: {}\n", yaml_list(&[address.to_string()])));
    }
    if let Some(gateway) = &net.gateway {
        out.push_str("    routes:\n");
        out.push_str(&format!("      - to: default\n        via: {gateway}\n"));
    }
    if !net.nameservers.is_empty() || !net.search.is_empty() {
        out.push_str("    nameservers:\n");
        if !net.nameservers.is_empty() {
            out.push_str(&format!("      addresses: {}\n", yaml_list(&net.nameservers)));
        }
        if !net.search.is_empty() {
            out.push_str(&format!("      search: {}\n", yaml_list(&net.search)));
        }
    }
    out
}

/// `network-interfaces` block for meta-data, indented as a YAML literal.
pub fn render_eni(net: &StaticNetwork) -> String {
    let family = if net.is_ipv4() { "inet" } else { "inet6" };
    let mut lines = vec![
        format!("auto {}", net.interface),
        format!("iface {} {family} static", net.interface),
    ];
    if let Some(address) = &net.address {
        lines.push(format!("  address {}", address.addr));
        lines.push(format!("  netmask {}", address.netmask()));
    }
    if let Some(gateway) = &net.gateway {
        lines.push(format!("  gateway {gateway}"));
    }
    if !net.nameservers.is_empty() {
        lines.push(format!("  dns-nameservers {}", net.nameservers.join(" ")));
    }
    if !net.search.is_empty() {
        lines.push(format!("  dns-search {}", net.search.join(" ")));
    }
    if let Some(mac) = &net.mac_address {
        lines.push(format!("  hwaddress ether {mac}"));
    }

    let mut out = String::from("network-interfaces: |\n");
    for line in lines {
        out.push_str("  ");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(format: NetConfigFormat) -> StaticNetwork {
        StaticNetwork {
            interface: "eth0".to_string(),
            address: Some("192.168.10.5/24".parse().unwrap()),
            gateway: Some("192.168.10.1".parse().unwrap()),
            nameservers: vec!["1.1.1.1".to_string(), "9.9.9.9".to_string()],
            search: vec!["lab.local".to_string()],
            mac_address: None,
            format,
        }
    }

    #[test]
    fn cidr_parsing_and_netmask() {
        let cidr: Cidr = "10.1.2.3/20".parse().unwrap();
        assert_eq!(cidr.netmask(), "255.255.240.0");
        assert_eq!(cidr.to_string(), "10.1.2.3/20");
        assert_eq!("10.0.0.1/0".parse::<Cidr>().unwrap().netmask(), "0.0.0.0");
        assert_eq!("fd00::5/64".parse::<Cidr>().unwrap().netmask(), "64");

        for bad in ["10.0.0.1", "10.0.0.1/33", "host/24", "10.0.0.1/x"] {
            assert!(bad.parse::<Cidr>().is_err(), "{bad}");
        }
    }

    #[test]
    fn v2_document() {
        assert_eq!(
            render_network_config(&net(NetConfigFormat::V2)).unwrap(),
            "version: 2
ethernets:
  eth0:
    dhcp4: false
    addresses: [\"192.168.10.5/24\"]
    routes:
      - to: default
        via: 192.168.10.1
    nameservers:
      addresses: [\"1.1.1.1\",\"9.9.9.9\"]
      search: [\"lab.local\"]
"
        );
    }

    #[test]
    fn v1_document_matches_by_mac() {
        let mut n = net(NetConfigFormat::V1);
        n.mac_address = Some("00:15:5d:01:02:03".to_string());
        let doc = render_network_config(&n).unwrap();
        assert!(doc.starts_with("version: 1\nconfig:\n  - type: physical\n    name: eth0\n"));
        assert!(doc.contains("    mac_address: \"00:15:5d:01:02:03\"\n"));
        assert!(doc.contains("        address: 192.168.10.5/24\n        gateway: 192.168.10.1\n"));
    }

    #[test]
    fn eni_goes_into_meta_data() {
        let n = net(NetConfigFormat::Eni);
        assert!(render_network_config(&n).is_none());
        assert_eq!(
            render_eni(&n),
            "network-interfaces: |
  auto eth0
  iface eth0 inet static
    address 192.168.10.5
    netmask 255.255.255.0
    gateway 192.168.10.1
    dns-nameservers 1.1.1.1 9.9.9.9
    dns-search lab.local
"
        );
    }

    #[test]
    fn gateway_only_is_still_static() {
        let n = StaticNetwork {
            address: None,
            nameservers: vec![],
            search: vec![],
            ..net(NetConfigFormat::V2)
        };
        assert_eq!(
            render_network_config(&n).unwrap(),
            "version: 2
ethernets:
  eth0:
    dhcp4: false
    routes:
      - to: default
        via: 192.168.10.1
"
        );

        let v1 = render_network_config(&StaticNetwork {
            format: NetConfigFormat::V1,
            ..n.clone()
        })
        .unwrap();
        assert!(v1.ends_with("      - type: static\n        gateway: 192.168.10.1\n"), "{v1}");

        let eni = render_eni(&n);
        assert!(!eni.contains("address"), "{eni}");
        assert!(eni.contains("    gateway 192.168.10.1\n"));
    }

    #[test]
    fn dns_only_keeps_dhcp_off() {
        let n = StaticNetwork {
            address: None,
            gateway: None,
            ..net(NetConfigFormat::V2)
        };
        let doc = render_network_config(&n).unwrap();
        assert!(doc.contains("    dhcp4: false\n"));
        assert!(!doc.contains("routes"));
        assert!(doc.ends_with("    nameservers:\n      addresses: [\"1.1.1.1\",\"9.9.9.9\"]\n      search: [\"lab.local\"]\n"));
    }
}
