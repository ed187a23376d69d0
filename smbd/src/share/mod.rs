//! In-memory table of exported shares, their access lists, and the
//! host/user authorization order reproduced from `export.c`.

mod veto;

pub use veto::VetoFilter;

use std::collections::HashMap;

use smb_core::error::{AuthError, SMBError};
use smb_core::logging::debug;
use smb_core::SMBResult;

use crate::config::ShareConfig;

/// `IPC$` is the always-present, path-less pipe share; its tid is fixed.
pub const IPC_SHARE_NAME: &str = "IPC$";
pub const IPC_SHARE_TID: u32 = 1;

#[derive(Debug, Clone)]
pub struct Share {
    pub name: String,
    /// `None` for IPC$.
    pub path: Option<String>,
    pub tid: u32,
    pub available: bool,
    pub browsable: bool,
    pub guest_ok: bool,
    pub guest_only: bool,
    pub oplocks: bool,
    pub read_only: bool,
    pub write_ok: bool,
    pub writeable: bool,
    pub store_dos_attributes: bool,
    pub max_connections: u32,
    pub current_connections: u32,
    pub comment: String,
    pub allow_hosts: Vec<String>,
    pub deny_hosts: Vec<String>,
    pub valid_users: Vec<String>,
    pub invalid_users: Vec<String>,
    pub read_list: Vec<String>,
    pub write_list: Vec<String>,
    pub veto_filters: Vec<VetoFilter>,
}

impl Share {
    fn ipc(tid: u32) -> Self {
        Self {
            name: IPC_SHARE_NAME.to_string(),
            path: None,
            tid,
            available: true,
            browsable: false,
            guest_ok: true,
            guest_only: false,
            oplocks: false,
            read_only: true,
            write_ok: false,
            writeable: false,
            store_dos_attributes: false,
            max_connections: 0,
            current_connections: 0,
            comment: "IPC Service".to_string(),
            allow_hosts: Vec::new(),
            deny_hosts: Vec::new(),
            valid_users: Vec::new(),
            invalid_users: Vec::new(),
            read_list: Vec::new(),
            write_list: Vec::new(),
            veto_filters: Vec::new(),
        }
    }

    fn from_config(config: ShareConfig, tid: u32) -> SMBResult<Self> {
        let name = config
            .name
            .ok_or_else(|| SMBError::config_error("share config is missing sharename"))?;
        let veto_filters = config.veto_files.iter().map(|pat| VetoFilter::compile(pat)).collect();
        Ok(Self {
            name,
            path: config.path,
            tid,
            available: config.available,
            browsable: config.browsable,
            guest_ok: config.guest_ok,
            guest_only: config.guest_only,
            oplocks: config.oplocks,
            read_only: config.read_only,
            write_ok: config.write_ok,
            writeable: config.writeable,
            store_dos_attributes: config.store_dos_attributes,
            max_connections: config.max_connections,
            current_connections: 0,
            comment: config.comment,
            allow_hosts: config.allow_hosts,
            deny_hosts: config.deny_hosts,
            valid_users: config.valid_users,
            invalid_users: config.invalid_users,
            read_list: config.read_list,
            write_list: config.write_list,
            veto_filters,
        })
    }

    /// Host/user authorization order per `export.c`'s `get_cifsd_share`:
    /// host check first, then user check. IPC$ (no path) never runs the
    /// user check at all.
    fn authorize(&self, peer_addr: &str, user: &str) -> SMBResult<bool> {
        self.validate_host(peer_addr)?;
        if self.path.is_none() {
            return Ok(self.writeable);
        }
        self.validate_user(user)
    }

    fn validate_host(&self, peer_addr: &str) -> SMBResult<()> {
        if !self.allow_hosts.is_empty() {
            if self.allow_hosts.iter().any(|h| h == peer_addr) {
                return Ok(());
            }
            return Err(SMBError::auth_error(AuthError::HostDenied));
        }
        if self.deny_hosts.iter().any(|h| h == peer_addr) {
            return Err(SMBError::auth_error(AuthError::HostDenied));
        }
        Ok(())
    }

    fn validate_user(&self, user: &str) -> SMBResult<bool> {
        if self.guest_ok {
            return Ok(self.compute_can_write(user));
        }
        if self.invalid_users.iter().any(|u| u == user) {
            return Err(SMBError::auth_error(AuthError::UserDenied));
        }
        if !self.valid_users.is_empty() && !self.valid_users.iter().any(|u| u == user) {
            return Err(SMBError::auth_error(AuthError::UserDenied));
        }
        Ok(self.compute_can_write(user))
    }

    fn compute_can_write(&self, user: &str) -> bool {
        let mut can_write = self.writeable;
        if self.read_list.iter().any(|u| u == user) {
            can_write = false;
        }
        if self.write_list.iter().any(|u| u == user) {
            can_write = true;
        }
        can_write
    }

    pub fn matches_veto(&self, name: &str) -> bool {
        self.veto_filters.iter().any(|f| f.matches(name))
    }
}

/// Case-insensitive in-memory table of exported shares.
pub struct ShareRegistry {
    shares: HashMap<String, Share>,
    next_tid: u32,
}

impl Default for ShareRegistry {
    fn default() -> Self {
        let mut shares = HashMap::new();
        shares.insert(IPC_SHARE_NAME.to_ascii_lowercase(), Share::ipc(IPC_SHARE_TID));
        Self { shares, next_tid: IPC_SHARE_TID + 1 }
    }
}

impl ShareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests one share's config blob. Recognized options are strictly
    /// enumerated in [`ShareConfig`]; a parse error rolls the share back
    /// entirely rather than leaving a partially-built entry installed.
    pub fn add_share_from_blob(&mut self, blob: &str) -> SMBResult<()> {
        let config = ShareConfig::from_blob(blob)?;
        let tid = self.next_tid;
        let share = Share::from_config(config, tid)?;
        let key = share.name.to_ascii_lowercase();
        if self.shares.contains_key(&key) {
            return Err(SMBError::config_error(format!("share already exists: {}", share.name)));
        }
        self.next_tid += 1;
        debug!(share = %share.name, tid, "added share");
        self.shares.insert(key, share);
        Ok(())
    }

    pub fn remove_share(&mut self, name: &str) -> bool {
        self.shares.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn lookup_share(&self, name: &str) -> Option<&Share> {
        self.shares.get(&name.to_ascii_lowercase())
    }

    pub fn lookup_share_mut(&mut self, name: &str) -> Option<&mut Share> {
        self.shares.get_mut(&name.to_ascii_lowercase())
    }

    /// `authorize(connection, session, name) -> (share, can_write) | ERR`.
    /// `tcount` (current_connections) is left untouched on denial.
    pub fn authorize(&self, peer_addr: &str, user: &str, name: &str) -> SMBResult<(&Share, bool)> {
        let share = self
            .shares
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| SMBError::protocol_error(format!("no such share: {name}")))?;
        let can_write = share.authorize(peer_addr, user)?;
        Ok((share, can_write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(extra: &str) -> String {
        format!("sharename = data<path = /srv/data{extra}")
    }

    #[test]
    fn ipc_share_is_always_present_with_tid_one() {
        let registry = ShareRegistry::new();
        let share = registry.lookup_share("ipc$").unwrap();
        assert_eq!(share.tid, IPC_SHARE_TID);
        assert!(share.path.is_none());
    }

    #[test]
    fn authorize_deny_by_host() {
        let mut registry = ShareRegistry::new();
        registry.add_share_from_blob(&blob("<allow hosts = 10.0.0.1")).unwrap();
        let err = registry.authorize("10.0.0.2", "alice", "data").unwrap_err();
        assert!(matches!(err, SMBError::Auth(AuthError::HostDenied)));
        assert_eq!(registry.lookup_share("data").unwrap().current_connections, 0);
    }

    #[test]
    fn writability_demotion_and_promotion() {
        let mut registry = ShareRegistry::new();
        registry
            .add_share_from_blob(&blob("<writeable = 1<read list = alice"))
            .unwrap();
        let (_, alice_write) = registry.authorize("10.0.0.1", "alice", "data").unwrap();
        assert!(!alice_write);
        let (_, bob_write) = registry.authorize("10.0.0.1", "bob", "data").unwrap();
        assert!(bob_write);
    }

    #[test]
    fn valid_users_is_an_allow_list_when_nonempty() {
        let mut registry = ShareRegistry::new();
        registry.add_share_from_blob(&blob("<valid users = alice")).unwrap();
        assert!(registry.authorize("10.0.0.1", "alice", "data").is_ok());
        let err = registry.authorize("10.0.0.1", "mallory", "data").unwrap_err();
        assert!(matches!(err, SMBError::Auth(AuthError::UserDenied)));
    }

    #[test]
    fn duplicate_share_name_is_rejected() {
        let mut registry = ShareRegistry::new();
        registry.add_share_from_blob(&blob("")).unwrap();
        let err = registry.add_share_from_blob(&blob("")).unwrap_err();
        assert!(matches!(err, SMBError::Config(_)));
    }

    #[test]
    fn remove_then_readd_yields_fresh_tid() {
        let mut registry = ShareRegistry::new();
        registry.add_share_from_blob(&blob("")).unwrap();
        let first_tid = registry.lookup_share("data").unwrap().tid;
        registry.remove_share("data");
        registry.add_share_from_blob(&blob("")).unwrap();
        let second_tid = registry.lookup_share("data").unwrap().tid;
        assert_ne!(first_tid, second_tid);
    }
}
