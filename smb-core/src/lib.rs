pub mod error;
pub mod logging;

use error::SMBError;

pub type SMBResult<T> = Result<T, SMBError>;

/// Ids reserved by the wire protocol and never handed out by an allocator.
pub const RESERVED_SMB1_TID: u32 = 0xFFFF;
pub const RESERVED_SMB2_UID: u32 = 0xFFFE;
pub const RESERVED_FID_ZERO: u32 = 0;
pub const RESERVED_FID_MAX: u32 = 0xFFFFFFFF;
