use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

pub const META_DATA: &str = "\
instance-id: {{ instance_id }}
local-hostname: {{ hostname }}
";

pub const USER_DATA: &str = "\
#cloud-config
hostname: {{ hostname }}
fqdn: {{ fqdn }}
prefer_fqdn_over_hostname: false
timezone: {{ timezone }}
locale: {{ locale }}
users:
  - name: {{ username }}
    groups: [adm, sudo]
    shell: /bin/bash
    sudo: ALL=(ALL) NOPASSWD:ALL
    lock_passwd: {{ lock_passwd }}
    ssh_authorized_keys: {{ ssh_authorized_keys }}
ssh_pwauth: {{ ssh_pwauth }}
package_update: true
packages: {{ packages }}
power_state:
  mode: reboot
  condition: true
";

/// Appended to the built-in user-data when a password is set.
pub const USER_DATA_PASSWORD: &str = "\
chpasswd:
  expire: false
  users:
    - name: {{ username }}
      password: {{ password }}
      type: text
";

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\{\{\s*(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("invalid placeholder regex")
    })
}

/// Replace every `{{ name }}` whose name is in `values`; unknown
/// placeholders stay as written.
pub fn render(template: &str, values: &BTreeMap<&str, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| match values.get(&caps["name"]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// YAML scalar for `value`. JSON strings are valid YAML double-quoted scalars.
pub fn yaml_str(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// YAML flow sequence of strings.
pub fn yaml_list(values: &[String]) -> String {
    serde_json::Value::from(values.to_vec()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_placeholders_are_replaced_unknown_kept() {
        let mut values = BTreeMap::new();
        values.insert("hostname", "web01".to_string());
        assert_eq!(
            render("h={{hostname}} x={{ hostname }} y={{ nope }}", &values),
            "h=web01 x=web01 y={{ nope }}"
        );
    }

    #[test]
    fn yaml_values_are_quoted() {
        assert_eq!(yaml_str("p@ss: \"w\""), r#""p@ss: \"w\"""#);
        assert_eq!(yaml_list(&["a".to_string(), "b c".to_string()]), r#"["a","b c"]"#);
        assert_eq!(yaml_list(&[]), "[]");
    }
}
