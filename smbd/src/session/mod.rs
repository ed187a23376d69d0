//! Hash-indexed session table keyed by 64-bit session id, per-session
//! tree-connect allocation, and SMB3 channel binding.

mod channel;
mod tree_connect;

pub use channel::Channel;
pub use tree_connect::TreeConnect;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::handle::HandleTable;
use crate::id::{IdAllocator, IdFlavor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlavor {
    Smb1,
    Smb2,
}

/// One authenticated session: a user, its bound channels, its tree
/// connections, and its per-session FID table.
pub struct Session {
    id: u64,
    flavor: SessionFlavor,
    pub user_name: String,
    pub anonymous: bool,
    pub guest: bool,
    pub signed: bool,
    pub encrypted: bool,
    pub sequence_number: u64,
    pub preauth_hash: [u8; 64],
    pub signing_key: [u8; 16],
    pub encryption_key: [u8; 16],
    pub decryption_key: [u8; 16],
    pub ntlmssp_blob: Vec<u8>,
    pub rpc_handles: Vec<u32>,
    channels: Vec<Channel>,
    tree_connects: HashMap<u32, TreeConnect>,
    tree_id_allocator: IdAllocator,
    pub fid_table: HandleTable,
}

impl Session {
    fn new(id: u64, flavor: SessionFlavor) -> Self {
        Self {
            id,
            flavor,
            user_name: String::new(),
            anonymous: false,
            guest: false,
            signed: false,
            encrypted: false,
            sequence_number: 0,
            preauth_hash: [0; 64],
            signing_key: [0; 16],
            encryption_key: [0; 16],
            decryption_key: [0; 16],
            ntlmssp_blob: Vec::new(),
            rpc_handles: Vec::new(),
            channels: Vec::new(),
            tree_connects: HashMap::new(),
            tree_id_allocator: IdAllocator::new(IdFlavor::Smb2Uid),
            fid_table: HandleTable::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn flavor(&self) -> SessionFlavor {
        self.flavor
    }

    pub fn bind_channel(&mut self, channel: Channel) {
        self.channels.push(channel);
    }

    pub fn unbind_channel(&mut self, connection_id: u64) {
        self.channels.retain(|c| c.connection_id != connection_id);
    }

    pub fn has_channel(&self, connection_id: u64) -> bool {
        self.channels.iter().any(|c| c.connection_id == connection_id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn tree_connect(&mut self, share_tid: u32, writable: bool) -> SMBResult<u32> {
        let tid = self.tree_id_allocator.acquire()?;
        self.tree_connects.insert(tid, TreeConnect::new(tid, share_tid, writable));
        Ok(tid)
    }

    pub fn tree_disconnect(&mut self, tid: u32) -> SMBResult<()> {
        if self.tree_connects.remove(&tid).is_none() {
            return Err(SMBError::protocol_error(format!("no such tree connect: {tid}")));
        }
        self.tree_id_allocator.release(tid)
    }

    pub fn lookup_tree(&self, tid: u32) -> Option<&TreeConnect> {
        self.tree_connects.get(&tid)
    }

    pub fn tree_count(&self) -> usize {
        self.tree_connects.len()
    }
}

/// Process-wide table of live sessions, keyed by 64-bit id.
pub struct SessionTable {
    sessions: HashMap<u64, Session>,
    next_id: AtomicU64,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self { sessions: HashMap::new(), next_id: AtomicU64::new(1) }
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn create_smb1(&mut self) -> u64 {
        let id = self.fresh_id();
        self.sessions.insert(id, Session::new(id, SessionFlavor::Smb1));
        id
    }

    pub fn create_smb2(&mut self) -> u64 {
        let id = self.fresh_id();
        self.sessions.insert(id, Session::new(id, SessionFlavor::Smb2));
        id
    }

    pub fn lookup(&self, id: u64) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn lookup_mut(&mut self, id: u64) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Destroys a session. Per the data model, a session is destroyed when
    /// its last channel disconnects and no durable handle references remain;
    /// that policy decision belongs to the caller (the dispatch seam), this
    /// is the unconditional removal primitive.
    pub fn destroy(&mut self, id: u64) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let mut table = SessionTable::new();
        let a = table.create_smb2();
        let b = table.create_smb2();
        assert_ne!(a, b);
    }

    #[test]
    fn flags_set_at_creation_never_change() {
        let mut table = SessionTable::new();
        let id = table.create_smb1();
        assert_eq!(table.lookup(id).unwrap().flavor(), SessionFlavor::Smb1);
    }

    #[test]
    fn tree_connect_allocates_and_releases_ids() {
        let mut table = SessionTable::new();
        let id = table.create_smb2();
        let session = table.lookup_mut(id).unwrap();
        let tid = session.tree_connect(5, true).unwrap();
        assert!(session.lookup_tree(tid).is_some());
        session.tree_disconnect(tid).unwrap();
        assert!(session.lookup_tree(tid).is_none());
    }
}
