//! Dense small-integer identifier pools with reserved holes, backing TIDs,
//! UIDs, and generic 32-bit ids handed out across the server.

use std::collections::HashSet;

use smb_core::error::AllocatorError;
use smb_core::{SMBResult, RESERVED_FID_MAX, RESERVED_FID_ZERO, RESERVED_SMB1_TID, RESERVED_SMB2_UID};
use smb_core::error::SMBError;

/// Which reserved holes an [`IdAllocator`] must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdFlavor {
    /// Never returns `0xFFFF`; may return `0`.
    Smb1Tid,
    /// Never returns `0` or `0xFFFE`.
    Smb2Uid,
    /// Any non-zero 32-bit id, excluding `0` and `0xFFFFFFFF`.
    Generic,
}

impl IdFlavor {
    fn is_reserved(self, id: u32) -> bool {
        match self {
            Self::Smb1Tid => id == RESERVED_SMB1_TID,
            Self::Smb2Uid => id == 0 || id == RESERVED_SMB2_UID,
            Self::Generic => id == RESERVED_FID_ZERO || id == RESERVED_FID_MAX,
        }
    }

    fn start(self) -> u32 {
        match self {
            Self::Smb1Tid => 0,
            Self::Smb2Uid | Self::Generic => 1,
        }
    }
}

/// Bitmap-backed allocator guaranteeing no duplicates among outstanding ids.
///
/// The allocator tracks the lowest candidate not yet proven taken so repeated
/// `acquire` calls after a fresh start are O(1) amortized; `outstanding`
/// records exactly which ids are live so `release` can reject a programming
/// error (releasing an id that was never handed out).
pub struct IdAllocator {
    flavor: IdFlavor,
    outstanding: HashSet<u32>,
    next_candidate: u32,
}

impl IdAllocator {
    pub fn new(flavor: IdFlavor) -> Self {
        Self {
            flavor,
            outstanding: HashSet::new(),
            next_candidate: flavor.start(),
        }
    }

    pub fn acquire(&mut self) -> SMBResult<u32> {
        let mut candidate = self.next_candidate;
        loop {
            if candidate == u32::MAX {
                return Err(SMBError::allocator_error(AllocatorError::Exhausted));
            }
            if !self.flavor.is_reserved(candidate) && !self.outstanding.contains(&candidate) {
                self.outstanding.insert(candidate);
                self.next_candidate = candidate.wrapping_add(1);
                return Ok(candidate);
            }
            candidate = candidate.wrapping_add(1);
        }
    }

    pub fn release(&mut self, id: u32) -> SMBResult<()> {
        if !self.outstanding.remove(&id) {
            return Err(SMBError::allocator_error(AllocatorError::InvalidRelease));
        }
        if id < self.next_candidate {
            self.next_candidate = id;
        }
        Ok(())
    }

    pub fn is_outstanding(&self, id: u32) -> bool {
        self.outstanding.contains(&id)
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smb1_tid_never_returns_reserved_hole() {
        let mut alloc = IdAllocator::new(IdFlavor::Smb1Tid);
        for _ in 0..5 {
            let id = alloc.acquire().unwrap();
            assert_ne!(id, RESERVED_SMB1_TID);
        }
    }

    #[test]
    fn smb2_uid_never_returns_zero_or_reserved_hole() {
        let mut alloc = IdAllocator::new(IdFlavor::Smb2Uid);
        let id = alloc.acquire().unwrap();
        assert_ne!(id, 0);
        assert_ne!(id, RESERVED_SMB2_UID);
    }

    #[test]
    fn release_then_reissue() {
        let mut alloc = IdAllocator::new(IdFlavor::Generic);
        let a = alloc.acquire().unwrap();
        let b = alloc.acquire().unwrap();
        assert_ne!(a, b);
        alloc.release(a).unwrap();
        let c = alloc.acquire().unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn release_of_unallocated_id_is_invalid() {
        let mut alloc = IdAllocator::new(IdFlavor::Generic);
        let err = alloc.release(42).unwrap_err();
        assert!(matches!(err, SMBError::Allocator(AllocatorError::InvalidRelease)));
    }

    #[test]
    fn no_duplicates_among_outstanding() {
        let mut alloc = IdAllocator::new(IdFlavor::Generic);
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = alloc.acquire().unwrap();
            assert!(seen.insert(id), "duplicate id issued while outstanding");
        }
    }
}
