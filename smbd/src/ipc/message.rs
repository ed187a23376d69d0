//! Wire shape of one IPC message: `{version, type, size, payload}`, with the
//! correlation `handle` carried in the first four bytes of the payload.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use smb_core::error::{IpcError, SMBError};
use smb_core::SMBResult;

/// Mirrors `CIFSD_GENL_VERSION`: every inbound message is checked against
/// this and rejected if it disagrees.
pub const IPC_PROTOCOL_VERSION: u32 = 1;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum MessageType {
    HeartbeatReq = 1,
    HeartbeatResp = 2,
    StartingUp = 3,
    StartingUpResp = 4,
    ShuttingDown = 5,
    ShuttingDownResp = 6,
    LoginReq = 7,
    LoginResp = 8,
    ShareConfigReq = 9,
    ShareConfigResp = 10,
    TreeConnectReq = 11,
    TreeConnectResp = 12,
    TreeDisconnectReq = 13,
    TreeDisconnectResp = 14,
    LogoutReq = 15,
    LogoutResp = 16,
    RpcReq = 17,
    RpcResp = 18,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::try_from_primitive(value).ok()
    }

    /// The expected response type for a request type: `_REQ + 1`, per the
    /// bridge's pairing contract. `None` for response types themselves and
    /// for the fire-and-forget messages that expect no reply.
    pub fn expected_response(self) -> Option<Self> {
        match self {
            Self::HeartbeatReq => Some(Self::HeartbeatResp),
            Self::StartingUp => Some(Self::StartingUpResp),
            Self::LoginReq => Some(Self::LoginResp),
            Self::ShareConfigReq => Some(Self::ShareConfigResp),
            Self::TreeConnectReq => Some(Self::TreeConnectResp),
            Self::RpcReq => Some(Self::RpcResp),
            _ => None,
        }
    }

    pub fn is_fire_and_forget(self) -> bool {
        matches!(self, Self::TreeDisconnectReq | Self::LogoutReq | Self::ShuttingDown)
    }
}

#[derive(Debug, Clone)]
pub struct IpcMessage {
    pub version: u32,
    pub message_type: u32,
    pub payload: Vec<u8>,
}

impl IpcMessage {
    pub fn new(message_type: MessageType, handle: u32, body: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(4 + body.len());
        payload.extend_from_slice(&handle.to_le_bytes());
        payload.extend_from_slice(body);
        Self { version: IPC_PROTOCOL_VERSION, message_type: message_type as u32, payload }
    }

    pub fn handle(&self) -> SMBResult<u32> {
        let bytes: [u8; 4] = self
            .payload
            .get(0..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| SMBError::protocol_error("ipc payload shorter than a handle"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn body(&self) -> &[u8] {
        &self.payload[4.min(self.payload.len())..]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.payload.len());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.message_type.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> SMBResult<Self> {
        if bytes.len() < 12 {
            return Err(SMBError::protocol_error("ipc header shorter than 12 bytes"));
        }
        let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let message_type = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let size = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let payload = bytes
            .get(12..12 + size)
            .ok_or_else(|| SMBError::protocol_error("ipc payload shorter than declared size"))?
            .to_vec();
        if version != IPC_PROTOCOL_VERSION {
            return Err(SMBError::ipc_error(IpcError::VersionMismatch { expected: IPC_PROTOCOL_VERSION, actual: version }));
        }
        Ok(Self { version, message_type, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let msg = IpcMessage::new(MessageType::LoginReq, 7, b"alice");
        let bytes = msg.to_bytes();
        let parsed = IpcMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.handle().unwrap(), 7);
        assert_eq!(parsed.body(), b"alice");
        assert_eq!(parsed.message_type, MessageType::LoginReq as u32);
    }

    #[test]
    fn rejects_version_mismatch() {
        let mut bytes = IpcMessage::new(MessageType::LoginReq, 1, b"x").to_bytes();
        bytes[0] = 0xEE;
        let err = IpcMessage::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, SMBError::Ipc(IpcError::VersionMismatch { .. })));
    }

    #[test]
    fn response_type_is_request_type_plus_one() {
        assert_eq!(MessageType::LoginReq.expected_response(), Some(MessageType::LoginResp));
        assert_eq!(MessageType::LoginReq as u32 + 1, MessageType::LoginResp as u32);
    }
}
