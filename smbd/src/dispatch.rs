//! Dispatch seam: resolves session/tree/FID for an inbound work item,
//! invokes an external PDU command handler, applies the signing/encryption
//! hook to the response, and forwards DCE/RPC named-pipe traffic to the IPC
//! bridge.
//!
//! The PDU encoders/decoders, the per-command wire semantics, and the
//! signing/encryption key derivation are all external collaborators; this
//! module defines only the seams (`PduHandler`, `KeyMaterial`) they are
//! reached through.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::logging::debug;
use smb_core::SMBResult;

use crate::handle::{get_fp, FileHandle, HandleTable, PersistentTable};
use crate::ipc::bridge::IpcBridge;
use crate::ipc::message::MessageType;
use crate::session::{Session, SessionTable};
use crate::share::ShareRegistry;

/// One in-flight request/response pair: the unit the dispatch seam and
/// connection engine hand back and forth. `response` is resizable (backed by
/// [`crate::buffer::realloc_response`]) since handlers don't know their
/// output size up front.
pub struct WorkItem {
    pub connection_id: u64,
    pub session_id: Option<u64>,
    pub tree_id: Option<u32>,
    pub request: Vec<u8>,
    pub response: Vec<u8>,
    pub cancelled: bool,
}

impl WorkItem {
    pub fn new(connection_id: u64, request: Vec<u8>) -> Self {
        Self { connection_id, session_id: None, tree_id: None, request, response: Vec::new(), cancelled: false }
    }
}

/// External seam for one SMB1/SMB2/SMB3 command handler, keyed by whatever
/// opcode the PDU layer decodes. The dispatch seam never interprets command
/// semantics itself - it only resolves context and hands off.
pub trait PduHandler: Send + Sync {
    fn handle(&self, work: &mut WorkItem, session: &mut Session) -> SMBResult<()>;
}

/// External seam for signing/encryption key derivation (NTLMSSP, SMB3
/// preauth/session keys). Consumed, never implemented, by this module.
pub trait KeyMaterial: Send + Sync {
    fn sign(&self, session: &Session, payload: &mut Vec<u8>);
    fn encrypt(&self, session: &Session, payload: &mut Vec<u8>);
}

/// A no-op [`KeyMaterial`] for configurations or tests with signing and
/// encryption disabled.
pub struct NoKeyMaterial;

impl KeyMaterial for NoKeyMaterial {
    fn sign(&self, _session: &Session, _payload: &mut Vec<u8>) {}
    fn encrypt(&self, _session: &Session, _payload: &mut Vec<u8>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeType {
    Srvsvc,
    Winreg,
}

impl PipeType {
    /// Opens on `\srvsvc`, `\wkssvc`, `\winreg` map to these pipe types;
    /// `\wkssvc` maps onto `SRVSVC` (the ground truth's mapping table has no
    /// separate WKSSVC pipe type). Any other name is not an RPC pipe.
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_start_matches('\\') {
            "srvsvc" | "wkssvc" => Some(Self::Srvsvc),
            "winreg" => Some(Self::Winreg),
            _ => None,
        }
    }
}

bitflags! {
    /// `CIFSD_RPC_*_METHOD` flags carried in the first word of an `RPC_REQ`
    /// payload, per `transport_ipc.c`'s `cifsd_rpc_*` family.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RpcMethodFlags: u32 {
        const OPEN = 0x01;
        const CLOSE = 0x02;
        const WRITE = 0x04;
        const READ = 0x08;
        const IOCTL = 0x10;
    }
}

/// Resolves session/tree/FID for one work item, then invokes `handler`.
/// Errors resolving context never reach the PDU layer as handler errors -
/// they come back as [`SMBError`] directly so the connection engine can
/// decide framing-vs-teardown.
pub struct DispatchSeam<'a> {
    sessions: &'a mut SessionTable,
    shares: &'a ShareRegistry,
    ipc: &'a IpcBridge,
}

impl<'a> DispatchSeam<'a> {
    pub fn new(sessions: &'a mut SessionTable, shares: &'a ShareRegistry, ipc: &'a IpcBridge) -> Self {
        Self { sessions, shares, ipc }
    }

    /// Resolves the session via UID/Session-ID, then hands the work item and
    /// session to `handler`. Tree/FID resolution within that session is the
    /// handler's job via [`Session::lookup_tree`] and
    /// [`crate::handle::get_fp`] - the seam only guarantees the session
    /// exists and is reachable from the connection that sent the request.
    pub fn dispatch(&mut self, work: &mut WorkItem, handler: &dyn PduHandler, key_material: &dyn KeyMaterial) -> SMBResult<()> {
        let session_id = work
            .session_id
            .ok_or_else(|| SMBError::protocol_error("work item has no session id to resolve"))?;
        let session = self
            .sessions
            .lookup_mut(session_id)
            .ok_or_else(|| SMBError::protocol_error(format!("no such session: {session_id}")))?;
        if !session.has_channel(work.connection_id) {
            return Err(SMBError::protocol_error("request arrived on an unbound channel"));
        }

        handler.handle(work, session)?;

        if session.signed {
            key_material.sign(session, &mut work.response);
        }
        if session.encrypted {
            key_material.encrypt(session, &mut work.response);
        }
        Ok(())
    }

    /// Authorizes and binds a tree connect, consulting the Share Registry
    /// (4.D) and the IPC bridge's `TREE_CONNECT_REQ` for daemon-side policy.
    pub async fn tree_connect(
        &mut self,
        session_id: u64,
        peer_addr: &str,
        user: &str,
        share_name: &str,
        ipc_handle: u32,
    ) -> SMBResult<u32> {
        let (share, can_write) = self.shares.authorize(peer_addr, user, share_name)?;
        let mut body = Vec::new();
        body.extend_from_slice(&share.tid.to_le_bytes());
        self.ipc.send_request(MessageType::TreeConnectReq, ipc_handle, &body).await?;

        let session = self
            .sessions
            .lookup_mut(session_id)
            .ok_or_else(|| SMBError::protocol_error(format!("no such session: {session_id}")))?;
        session.tree_connect(share.tid, can_write)
    }

    pub fn tree_disconnect(&mut self, session_id: u64, tid: u32, ipc_handle: u32) -> SMBResult<()> {
        let session = self
            .sessions
            .lookup_mut(session_id)
            .ok_or_else(|| SMBError::protocol_error(format!("no such session: {session_id}")))?;
        session.tree_disconnect(tid)?;
        self.ipc.send_fire_and_forget(MessageType::TreeDisconnectReq, ipc_handle, &tid.to_le_bytes())
    }
}

/// Resolves a FID for a command that carries a volatile/persistent id pair,
/// per `get_fp`'s pid-preferred lookup.
pub fn resolve_fid<'a>(
    fid_table: &'a HandleTable,
    persistent_table: &'a PersistentTable,
    volatile_id: u32,
    persistent_id: u64,
) -> SMBResult<&'a FileHandle> {
    get_fp(fid_table, persistent_table, volatile_id, persistent_id)
}

/// Forwards one RPC request on a named-pipe handle to the IPC bridge and
/// releases the handle on `CLOSE`, both locally (the caller's FID table) and
/// in the daemon (the fire-and-forget semantics of a close are handled by
/// the caller once this returns).
pub async fn rpc_forward(
    ipc: &IpcBridge,
    ipc_handle: u32,
    pipe: PipeType,
    method: RpcMethodFlags,
    payload: &[u8],
) -> SMBResult<Vec<u8>> {
    debug!(?pipe, ?method, "forwarding rpc request over ipc bridge");
    let mut body = Vec::with_capacity(4 + payload.len());
    body.extend_from_slice(&method.bits().to_le_bytes());
    body.extend_from_slice(payload);
    ipc.send_request(MessageType::RpcReq, ipc_handle, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;
    impl PduHandler for EchoHandler {
        fn handle(&self, work: &mut WorkItem, _session: &mut Session) -> SMBResult<()> {
            work.response = work.request.clone();
            Ok(())
        }
    }

    #[test]
    fn pipe_type_maps_known_names() {
        assert_eq!(PipeType::from_path("\\srvsvc"), Some(PipeType::Srvsvc));
        assert_eq!(PipeType::from_path("wkssvc"), Some(PipeType::Srvsvc));
        assert_eq!(PipeType::from_path("\\winreg"), Some(PipeType::Winreg));
        assert_eq!(PipeType::from_path("\\notapipe"), None);
    }

    #[test]
    fn dispatch_rejects_work_on_unbound_channel() {
        let mut sessions = SessionTable::new();
        let session_id = sessions.create_smb2();
        let shares = ShareRegistry::new();
        use std::sync::Arc;
        struct NoopTransport;
        impl crate::ipc::bridge::IpcTransport for NoopTransport {
            fn send(&self, _bytes: Vec<u8>) -> SMBResult<()> {
                Ok(())
            }
        }
        let ipc = IpcBridge::new(Arc::new(NoopTransport));
        let mut seam = DispatchSeam::new(&mut sessions, &shares, &ipc);
        let mut work = WorkItem::new(99, b"hi".to_vec());
        work.session_id = Some(session_id);
        let err = seam.dispatch(&mut work, &EchoHandler, &NoKeyMaterial).unwrap_err();
        assert!(matches!(err, SMBError::Protocol(_)));
    }
}
