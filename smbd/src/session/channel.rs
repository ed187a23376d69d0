//! SMB3 multi-channel binding: a `(connection, per-channel signing key)` pair.
//! Channels are back-references from a [`super::Session`] to a connection and
//! must not keep the connection alive on their own, so this stores only the
//! connection's opaque id, never an owning handle.

#[derive(Debug, Clone)]
pub struct Channel {
    pub connection_id: u64,
    pub smb3_signing_key: [u8; 16],
}

impl Channel {
    pub fn new(connection_id: u64, smb3_signing_key: [u8; 16]) -> Self {
        Self { connection_id, smb3_signing_key }
    }
}
