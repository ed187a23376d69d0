//! Process-wide persistent-ID table for durable/persistent reopen: handles
//! survive connection loss, detached and timer-armed with `durable_timeout`,
//! until a reconnect presents the matching client/create GUID pair or the
//! timer expires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use uuid::Uuid;

use smb_core::error::{HandleError, SMBError};
use smb_core::SMBResult;

use super::FileHandle;

struct Entry {
    handle: FileHandle,
    /// Set while the owning connection is gone; cleared on reconnect.
    detached_deadline: Option<Instant>,
}

pub struct PersistentTable {
    entries: HashMap<u64, Entry>,
    by_guid: HashMap<(Uuid, Uuid), u64>,
    next_id: AtomicU64,
}

impl Default for PersistentTable {
    fn default() -> Self {
        Self { entries: HashMap::new(), by_guid: HashMap::new(), next_id: AtomicU64::new(1) }
    }
}

impl PersistentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly durably-opened handle, assigning it a persistent id.
    /// A collision with an id already outstanding is a programming error.
    pub fn register(&mut self, mut handle: FileHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        handle.persistent_id = Some(id);
        if handle.durable || handle.persistent {
            self.by_guid.insert((handle.client_guid, handle.create_guid), id);
        }
        self.entries.insert(id, Entry { handle, detached_deadline: None });
        id
    }

    pub fn lookup(&self, persistent_id: u64) -> Option<&FileHandle> {
        self.entries.get(&persistent_id).map(|e| &e.handle)
    }

    pub fn lookup_mut(&mut self, persistent_id: u64) -> Option<&mut FileHandle> {
        self.entries.get_mut(&persistent_id).map(|e| &mut e.handle)
    }

    /// Detaches a handle from its dead connection and arms its
    /// `durable_timeout`. Persistent (CA) handles with a zero timeout are
    /// armed with their configured `durable_timeout_secs` regardless.
    pub fn detach(&mut self, persistent_id: u64) -> SMBResult<()> {
        let entry = self
            .entries
            .get_mut(&persistent_id)
            .ok_or(SMBError::handle_error(HandleError::NotFound))?;
        let timeout = Duration::from_secs(entry.handle.durable_timeout_secs);
        entry.detached_deadline = Some(Instant::now() + timeout);
        Ok(())
    }

    /// Reconnects a durable handle by its client/create GUID pair, rebinding
    /// it to a fresh volatile id. Fails with `NotFound` once the
    /// `durable_timeout` window has elapsed, leaving byte-range locks and
    /// the persistent id untouched until then.
    pub fn reconnect(&mut self, client_guid: Uuid, create_guid: Uuid, new_volatile_id: u32) -> SMBResult<u64> {
        let id = *self
            .by_guid
            .get(&(client_guid, create_guid))
            .ok_or(SMBError::handle_error(HandleError::NotFound))?;
        let entry = self.entries.get_mut(&id).ok_or(SMBError::handle_error(HandleError::NotFound))?;
        if let Some(deadline) = entry.detached_deadline {
            if Instant::now() >= deadline {
                self.expire(id)?;
                return Err(SMBError::handle_error(HandleError::NotFound));
            }
        }
        entry.detached_deadline = None;
        entry.handle.volatile_id = new_volatile_id;
        Ok(id)
    }

    /// Forcibly closes one expired entry, mirroring the timer firing `close`.
    pub fn expire(&mut self, persistent_id: u64) -> SMBResult<()> {
        if let Some(entry) = self.entries.remove(&persistent_id) {
            self.by_guid.remove(&(entry.handle.client_guid, entry.handle.create_guid));
        }
        Ok(())
    }

    /// Sweeps every detached entry whose deadline has passed, closing each.
    /// Returns the persistent ids that were expired, for the caller to log
    /// or surface diagnostics about.
    pub fn sweep_expired(&mut self) -> Vec<u64> {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.detached_deadline.map(|d| now >= d).unwrap_or(false))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            let _ = self.expire(*id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn durable_handle(client_guid: Uuid, create_guid: Uuid) -> FileHandle {
        let mut handle = FileHandle::new(1, 1);
        handle.durable = true;
        handle.client_guid = client_guid;
        handle.create_guid = create_guid;
        handle.durable_timeout_secs = 0;
        handle
    }

    #[test]
    fn reconnect_rebinds_to_new_volatile_id() {
        let mut table = PersistentTable::new();
        let client_guid = Uuid::from_u128(1);
        let create_guid = Uuid::from_u128(2);
        let id = table.register(durable_handle(client_guid, create_guid));
        table.detach(id).unwrap();

        let reconnected_id = table.reconnect(client_guid, create_guid, 42).unwrap();
        assert_eq!(reconnected_id, id);
        assert_eq!(table.lookup(id).unwrap().volatile_id, 42);
    }

    #[test]
    fn reconnect_after_expiry_fails_not_found() {
        let mut table = PersistentTable::new();
        let client_guid = Uuid::from_u128(3);
        let create_guid = Uuid::from_u128(4);
        let id = table.register(durable_handle(client_guid, create_guid));
        table.detach(id).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let err = table.reconnect(client_guid, create_guid, 42).unwrap_err();
        assert!(matches!(err, SMBError::Handle(HandleError::NotFound)));
        assert!(table.lookup(id).is_none());
    }
}
