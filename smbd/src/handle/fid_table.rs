//! Per-session volatile FID table: a growable array indexed by volatile FID,
//! a companion bitmap allocator starting at FID 1, and `FREEING`-state
//! semantics for the close-then-cleanup split described in the handle table
//! contract.

use std::collections::HashMap;

use smb_core::error::{HandleError, SMBError};
use smb_core::SMBResult;

use super::{FileHandle, FileHandleState};
use crate::id::{IdAllocator, IdFlavor};

/// Mirrors `CIFSD_BITMAP_SIZE`: the fidtable never grows past this many
/// simultaneously open volatile ids.
pub const MAX_FIDS: u32 = 0xFFFF;

pub struct HandleTable {
    handles: HashMap<u32, FileHandle>,
    allocator: IdAllocator,
    capacity: u32,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self { handles: HashMap::new(), allocator: IdAllocator::new(IdFlavor::Generic), capacity: 16 }
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically allocates the lowest-free FID, installs `handle` fully
    /// initialized, and returns the FID. Doubles `capacity` on overflow
    /// instead of failing immediately, up to [`MAX_FIDS`].
    pub fn open(&mut self, mut handle: FileHandle) -> SMBResult<u32> {
        if self.handles.len() as u32 >= self.capacity {
            let grown = (self.capacity * 2).min(MAX_FIDS);
            if grown == self.capacity {
                return Err(SMBError::handle_error(HandleError::TooManyOpen));
            }
            self.capacity = grown;
        }
        if self.handles.len() as u32 >= MAX_FIDS {
            return Err(SMBError::handle_error(HandleError::TooManyOpen));
        }
        let fid = self.allocator.acquire()?;
        handle.volatile_id = fid;
        handle.state = FileHandleState::New;
        self.handles.insert(fid, handle);
        Ok(fid)
    }

    /// Returns `None` for a handle marked `FREEING`, matching the contract
    /// that concurrent lookups of a closing handle observe it as gone.
    pub fn lookup(&self, fid: u32) -> Option<&FileHandle> {
        self.handles.get(&fid).filter(|h| h.state != FileHandleState::Freeing)
    }

    pub fn lookup_mut(&mut self, fid: u32) -> Option<&mut FileHandle> {
        self.handles.get_mut(&fid).filter(|h| h.state != FileHandleState::Freeing)
    }

    /// Marks `fid` `FREEING`. Closing an already-`FREEING` (or already fully
    /// removed) fid is a no-op success, per the idempotence requirement.
    pub fn mark_closing(&mut self, fid: u32) -> SMBResult<()> {
        match self.handles.get_mut(&fid) {
            Some(handle) => {
                handle.state = FileHandleState::Freeing;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Completes the cleanup started by [`Self::mark_closing`], releasing the
    /// fid back to the allocator. Idempotent: removing an already-removed fid
    /// is a no-op.
    pub fn finish_close(&mut self, fid: u32) -> SMBResult<()> {
        if self.handles.remove(&fid).is_some() {
            self.allocator.release(fid)?;
        }
        Ok(())
    }

    /// Convenience for callers that don't need to split mark/finish across an
    /// unlock boundary.
    pub fn close(&mut self, fid: u32) -> SMBResult<()> {
        self.mark_closing(fid)?;
        self.finish_close(fid)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fid_reuse_after_close() {
        let mut table = HandleTable::new();
        let fid1 = table.open(FileHandle::new(0, 1)).unwrap();
        let fid2 = table.open(FileHandle::new(0, 2)).unwrap();
        let _fid3 = table.open(FileHandle::new(0, 3)).unwrap();
        table.close(fid2).unwrap();
        let fid_reused = table.open(FileHandle::new(0, 4)).unwrap();
        assert_eq!(fid_reused, fid2);
        assert_ne!(fid1, fid2);
    }

    #[test]
    fn freeing_handle_is_invisible_to_lookup() {
        let mut table = HandleTable::new();
        let fid = table.open(FileHandle::new(0, 1)).unwrap();
        table.mark_closing(fid).unwrap();
        assert!(table.lookup(fid).is_none());
    }

    #[test]
    fn closing_a_freeing_handle_twice_is_idempotent() {
        let mut table = HandleTable::new();
        let fid = table.open(FileHandle::new(0, 1)).unwrap();
        table.close(fid).unwrap();
        table.close(fid).unwrap();
    }
}
