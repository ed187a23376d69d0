//! Per-session volatile FID table, the process-wide persistent-ID table for
//! durable/persistent reopen, and the inode-coordination hash.

mod fid_table;
mod inode;
mod persistent;

pub use fid_table::HandleTable;
pub use inode::{Inode, InodeTable};
pub use persistent::PersistentTable;

use uuid::Uuid;

use smb_core::error::{HandleError, SMBError};
use smb_core::SMBResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileHandleState {
    New,
    Freeing,
}

/// A FileHandle (FP): the unit the handle table and persistent table both
/// index, reachable by volatile-id through the owning session and, if
/// durable, by persistent-id through the global table.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub volatile_id: u32,
    pub persistent_id: Option<u64>,
    pub inode_id: u64,
    pub desired_access: u32,
    pub share_access: u32,
    pub file_attributes: u32,
    pub creation_time: u64,
    pub durable: bool,
    pub resilient: bool,
    pub persistent: bool,
    pub delete_on_close: bool,
    pub client_guid: Uuid,
    pub create_guid: Uuid,
    pub app_instance_id: Uuid,
    pub durable_timeout_secs: u64,
    pub state: FileHandleState,
    pub stream_name: Option<String>,
}

impl FileHandle {
    pub fn new(volatile_id: u32, inode_id: u64) -> Self {
        Self {
            volatile_id,
            persistent_id: None,
            inode_id,
            desired_access: 0,
            share_access: 0,
            file_attributes: 0,
            creation_time: 0,
            durable: false,
            resilient: false,
            persistent: false,
            delete_on_close: false,
            client_guid: Uuid::nil(),
            create_guid: Uuid::nil(),
            app_instance_id: Uuid::nil(),
            durable_timeout_secs: 0,
            state: FileHandleState::New,
            stream_name: None,
        }
    }
}

/// `get_fp(work, vid, pid)`: prefers `pid` when non-zero; a non-zero `vid`
/// that disagrees with the handle found under `pid` is `ERR_INVALID`.
pub fn get_fp<'a>(
    fid_table: &'a HandleTable,
    persistent_table: &'a PersistentTable,
    volatile_id: u32,
    persistent_id: u64,
) -> SMBResult<&'a FileHandle> {
    if persistent_id != 0 {
        let handle = persistent_table
            .lookup(persistent_id)
            .ok_or(SMBError::handle_error(HandleError::NotFound))?;
        if volatile_id != 0 && volatile_id != handle.volatile_id {
            return Err(SMBError::handle_error(HandleError::Invalid));
        }
        return Ok(handle);
    }
    fid_table.lookup(volatile_id).ok_or(SMBError::handle_error(HandleError::NotFound))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_fp_prefers_persistent_id() {
        let mut fids = HandleTable::new();
        let mut persistent = PersistentTable::new();
        let vid = fids.open(FileHandle::new(0, 1)).unwrap();
        let handle = fids.lookup(vid).unwrap().clone();
        let pid = persistent.register(handle);

        let found = get_fp(&fids, &persistent, vid, pid).unwrap();
        assert_eq!(found.persistent_id, Some(pid));
    }

    #[test]
    fn get_fp_mismatch_between_vid_and_pid_is_invalid() {
        let mut fids = HandleTable::new();
        let mut persistent = PersistentTable::new();
        let vid = fids.open(FileHandle::new(0, 1)).unwrap();
        let other_vid = fids.open(FileHandle::new(0, 2)).unwrap();
        let handle = fids.lookup(vid).unwrap().clone();
        let pid = persistent.register(handle);

        let err = get_fp(&fids, &persistent, other_vid, pid).unwrap_err();
        assert!(matches!(err, SMBError::Handle(HandleError::Invalid)));
    }
}
