//! Parsing for the `<`-delimited `key = value` configuration blobs carried
//! over the IPC bridge: the global option table and the per-share option
//! table enumerated in the external interfaces.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::logging::warn;
use smb_core::SMBResult;

/// A tri/penta-state boolean as the wire format actually allows it: plain
/// yes/no plus the signing-specific `auto`/`mandatory` and the
/// map-to-guest-specific `Bad User`/`Never` spellings. `writeable = mandatory`
/// versus `= enable` is unclear in the source this is distilled from; both
/// collapse to `true` here (an explicit Open Question resolution, see
/// DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolLike {
    Yes,
    No,
    Auto,
    Mandatory,
    BadUser,
    Never,
}

impl BoolLike {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "enable" | "1" => Some(Self::Yes),
            "no" | "false" | "disable" | "0" => Some(Self::No),
            "auto" => Some(Self::Auto),
            "mandatory" => Some(Self::Mandatory),
            "bad user" => Some(Self::BadUser),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    /// Collapses every truthy spelling (`yes`, `auto`, `mandatory`, `bad user`)
    /// to `true`; only `no`/`never` are falsy.
    pub fn as_bool(self) -> bool {
        !matches!(self, Self::No | Self::Never)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerSigning {
    #[default]
    Disable,
    Enable,
    Auto,
    Mandatory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MapToGuest {
    #[default]
    Disable,
    BadUser,
    Never,
}

/// One `key = value` pair split from a `<`-delimited configuration blob.
fn split_entries(blob: &str) -> Vec<(String, String)> {
    blob.split('<')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let (key, value) = entry.split_once('=')?;
            Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

/// Assembled either from a daemon-supplied config blob ([`GlobalConfig::from_blob`])
/// or, for in-process callers (tests, alternate front-ends), through the
/// generated owned-pattern builder: discrete setter calls ending in `.build()`.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(pattern = "owned", default)]
pub struct GlobalConfig {
    pub guest_account: Option<String>,
    pub server_string: String,
    pub workgroup: String,
    pub netbios_name: String,
    pub server_signing: ServerSigning,
    pub map_to_guest: MapToGuest,
    pub server_min_protocol: Option<String>,
    pub server_max_protocol: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            guest_account: None,
            server_string: "SMB CORE Server".to_string(),
            workgroup: "WORKGROUP".to_string(),
            netbios_name: "SMBD".to_string(),
            server_signing: ServerSigning::default(),
            map_to_guest: MapToGuest::default(),
            server_min_protocol: None,
            server_max_protocol: None,
        }
    }
}

impl GlobalConfig {
    pub fn from_blob(blob: &str) -> SMBResult<Self> {
        let mut config = Self::default();
        for (key, value) in split_entries(blob) {
            match key.as_str() {
                "guest account" => config.guest_account = Some(value),
                "server string" => config.server_string = value,
                "workgroup" => config.workgroup = value,
                "netbios name" => config.netbios_name = value,
                "server signing" => {
                    config.server_signing = match value.to_ascii_lowercase().as_str() {
                        "disable" => ServerSigning::Disable,
                        "enable" => ServerSigning::Enable,
                        "auto" => ServerSigning::Auto,
                        "mandatory" => ServerSigning::Mandatory,
                        other => {
                            return Err(SMBError::config_error(format!(
                                "invalid server signing value: {other}"
                            )))
                        }
                    }
                }
                "map to guest" => {
                    config.map_to_guest = match value.as_str() {
                        "Bad User" => MapToGuest::BadUser,
                        "Never" => MapToGuest::Never,
                        _ if BoolLike::parse(&value) == Some(BoolLike::No) => MapToGuest::Disable,
                        other => {
                            return Err(SMBError::config_error(format!(
                                "invalid map to guest value: {other}"
                            )))
                        }
                    }
                }
                "server min protocol" => config.server_min_protocol = Some(value),
                "server max protocol" => config.server_max_protocol = Some(value),
                other => warn!(key = other, "unknown global configuration key, skipping"),
            }
        }
        Ok(config)
    }
}

/// The recognized per-share options, pre-normalization; [`crate::share::Share`]
/// is built from this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareConfig {
    pub name: Option<String>,
    pub path: Option<String>,
    pub available: bool,
    pub browsable: bool,
    pub writeable: bool,
    pub guest_ok: bool,
    pub guest_only: bool,
    pub oplocks: bool,
    pub max_connections: u32,
    pub comment: String,
    pub allow_hosts: Vec<String>,
    pub deny_hosts: Vec<String>,
    pub valid_users: Vec<String>,
    pub invalid_users: Vec<String>,
    pub read_list: Vec<String>,
    pub read_only: bool,
    pub write_ok: bool,
    pub write_list: Vec<String>,
    pub store_dos_attributes: bool,
    pub veto_files: Vec<String>,
}

/// Splits a comma/space/tab-delimited access-list value into trimmed tokens.
pub fn conflist_entries(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(|tok| tok.trim())
        .filter(|tok| !tok.is_empty())
        .map(str::to_string)
        .collect()
}

impl ShareConfig {
    /// Parses one share's config blob. Per the Share Registry contract, a
    /// parse error rolls the whole share back: the caller must not install a
    /// partially-applied `ShareConfig`, so this returns `Err` instead of the
    /// default-filled struct it was building.
    pub fn from_blob(blob: &str) -> SMBResult<Self> {
        let mut config = Self { available: true, browsable: true, max_connections: 0, ..Default::default() };
        for (key, value) in split_entries(blob) {
            match key.as_str() {
                "sharename" => config.name = Some(value),
                "path" => config.path = Some(value),
                "available" => config.available = parse_required_bool(&key, &value)?,
                "browsable" => config.browsable = parse_required_bool(&key, &value)?,
                "writeable" => config.writeable = parse_required_bool(&key, &value)?,
                "guest ok" => config.guest_ok = parse_required_bool(&key, &value)?,
                "guest only" => config.guest_only = parse_required_bool(&key, &value)?,
                "oplocks" => config.oplocks = parse_required_bool(&key, &value)?,
                "max connections" => {
                    config.max_connections = value
                        .parse()
                        .map_err(|_| SMBError::config_error(format!("invalid max connections: {value}")))?
                }
                "comment" => config.comment = value,
                "allow hosts" | "hosts allow" => config.allow_hosts = conflist_entries(&value),
                "deny hosts" | "hosts deny" => config.deny_hosts = conflist_entries(&value),
                "valid users" => config.valid_users = conflist_entries(&value),
                "invalid users" => config.invalid_users = conflist_entries(&value),
                "read list" => config.read_list = conflist_entries(&value),
                "read only" => config.read_only = parse_required_bool(&key, &value)?,
                "write ok" => config.write_ok = parse_required_bool(&key, &value)?,
                "write list" => config.write_list = conflist_entries(&value),
                "store dos attributes" => config.store_dos_attributes = parse_required_bool(&key, &value)?,
                "veto files" => config.veto_files = parse_veto_files(&value),
                other => warn!(key = other, "unknown share configuration key, skipping"),
            }
        }
        Ok(config)
    }
}

fn parse_required_bool(key: &str, value: &str) -> SMBResult<bool> {
    BoolLike::parse(value)
        .map(BoolLike::as_bool)
        .ok_or_else(|| SMBError::config_error(format!("invalid boolean for {key}: {value}")))
}

/// `veto files` values are `/`-delimited glob entries, e.g. `/*.tmp/*.bak/`.
fn parse_veto_files(raw: &str) -> Vec<String> {
    raw.split('/').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_config_parses_known_keys_and_skips_unknown() {
        let blob = "server string = CORE Box<workgroup = HOME<bogus key = ignored";
        let config = GlobalConfig::from_blob(blob).unwrap();
        assert_eq!(config.server_string, "CORE Box");
        assert_eq!(config.workgroup, "HOME");
    }

    #[test]
    fn share_writeable_mandatory_and_enable_both_collapse_to_true() {
        let mandatory = ShareConfig::from_blob("writeable = mandatory").unwrap();
        let enabled = ShareConfig::from_blob("writeable = enable").unwrap();
        assert!(mandatory.writeable);
        assert!(enabled.writeable);
    }

    #[test]
    fn conflist_splits_on_comma_space_and_tab() {
        let tokens = conflist_entries("alice, bob\tcarol  dave");
        assert_eq!(tokens, vec!["alice", "bob", "carol", "dave"]);
    }

    #[test]
    fn veto_files_splits_on_slash() {
        let tokens = parse_veto_files("/*.tmp/*.bak/");
        assert_eq!(tokens, vec!["*.tmp", "*.bak"]);
    }

    #[test]
    fn bad_boolean_is_a_config_error() {
        let err = ShareConfig::from_blob("writeable = maybe").unwrap_err();
        assert!(matches!(err, SMBError::Config(_)));
    }
}
