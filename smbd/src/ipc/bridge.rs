//! The framed request/response channel to the user-space configuration
//! daemon: correlation table with a 2-second wait, daemon-identity
//! replacement on `STARTING_UP`, and fire-and-forget sends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use smb_core::error::{IpcError, SMBError};
use smb_core::logging::{debug, warn};
use smb_core::SMBResult;

use crate::config::{GlobalConfig, ServerSigning};

use super::message::{IpcMessage, MessageType};

/// The 2-second correlation wait from the IPC Bridge contract.
pub const IPC_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Abstracts the actual datagram transport (generic netlink in the daemon
/// this core is paired with); tests and alternate deployments supply their
/// own.
pub trait IpcTransport: Send + Sync {
    fn send(&self, bytes: Vec<u8>) -> SMBResult<()>;
}

struct Correlation {
    expected_response: MessageType,
    waiter: oneshot::Sender<SMBResult<Vec<u8>>>,
}

#[derive(Default)]
struct DaemonIdentity {
    registered: bool,
}

/// The fields `handle_startup_event` reads off a `STARTING_UP` request's
/// payload (`req->signing`, `req->netbios_name`, `req->server_string`,
/// `req->work_group`, `req->min_prot`, `req->max_prot`) and applies to
/// `server_conf` on first registration.
struct StartupFields {
    signing: ServerSigning,
    netbios_name: String,
    server_string: String,
    work_group: String,
    min_prot: Option<String>,
    max_prot: Option<String>,
}

/// Reads one `u32`-length-prefixed UTF-8 string starting at `*offset`,
/// advancing `offset` past it.
fn read_len_prefixed(buf: &[u8], offset: &mut usize) -> SMBResult<String> {
    let len_bytes = buf
        .get(*offset..*offset + 4)
        .ok_or_else(|| SMBError::protocol_error("startup payload truncated reading a length prefix"))?;
    let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    *offset += 4;
    let bytes = buf
        .get(*offset..*offset + len)
        .ok_or_else(|| SMBError::protocol_error("startup payload truncated reading a string body"))?;
    *offset += len;
    String::from_utf8(bytes.to_vec()).map_err(|_| SMBError::protocol_error("startup payload string is not valid utf-8"))
}

/// Decodes a `STARTING_UP` payload: one signing-policy byte followed by five
/// `u32`-length-prefixed strings (netbios name, server string, workgroup,
/// min protocol, max protocol - the latter two empty when unset, mirroring
/// `req->min_prot[0]`/`req->max_prot[0]`'s "empty means absent" check).
fn parse_startup_payload(payload: &[u8]) -> SMBResult<StartupFields> {
    let signing_byte = *payload
        .first()
        .ok_or_else(|| SMBError::protocol_error("startup payload missing signing policy byte"))?;
    let signing = match signing_byte {
        0 => ServerSigning::Disable,
        1 => ServerSigning::Enable,
        2 => ServerSigning::Auto,
        3 => ServerSigning::Mandatory,
        other => return Err(SMBError::protocol_error(format!("invalid signing policy byte: {other}"))),
    };

    let mut offset = 1;
    let netbios_name = read_len_prefixed(payload, &mut offset)?;
    let server_string = read_len_prefixed(payload, &mut offset)?;
    let work_group = read_len_prefixed(payload, &mut offset)?;
    let min_prot = read_len_prefixed(payload, &mut offset)?;
    let max_prot = read_len_prefixed(payload, &mut offset)?;

    Ok(StartupFields {
        signing,
        netbios_name,
        server_string,
        work_group,
        min_prot: if min_prot.is_empty() { None } else { Some(min_prot) },
        max_prot: if max_prot.is_empty() { None } else { Some(max_prot) },
    })
}

#[cfg(test)]
fn encode_startup_payload(fields: &StartupFields) -> Vec<u8> {
    fn push_len_prefixed(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }
    let mut out = vec![match fields.signing {
        ServerSigning::Disable => 0,
        ServerSigning::Enable => 1,
        ServerSigning::Auto => 2,
        ServerSigning::Mandatory => 3,
    }];
    push_len_prefixed(&mut out, &fields.netbios_name);
    push_len_prefixed(&mut out, &fields.server_string);
    push_len_prefixed(&mut out, &fields.work_group);
    push_len_prefixed(&mut out, fields.min_prot.as_deref().unwrap_or(""));
    push_len_prefixed(&mut out, fields.max_prot.as_deref().unwrap_or(""));
    out
}

pub struct IpcBridge {
    transport: Arc<dyn IpcTransport>,
    correlations: Mutex<HashMap<u32, Correlation>>,
    daemon: Mutex<DaemonIdentity>,
}

impl IpcBridge {
    pub fn new(transport: Arc<dyn IpcTransport>) -> Self {
        Self { transport, correlations: Mutex::new(HashMap::new()), daemon: Mutex::new(DaemonIdentity::default()) }
    }

    /// Sends a request carrying `handle` and waits up to [`IPC_WAIT_TIMEOUT`]
    /// for its paired response. The caller owns `handle`'s lifecycle in the
    /// id allocator and releases it after this returns, win or lose.
    pub async fn send_request(
        &self,
        message_type: MessageType,
        handle: u32,
        body: &[u8],
    ) -> SMBResult<Vec<u8>> {
        let expected_response = message_type
            .expected_response()
            .ok_or_else(|| SMBError::protocol_error("message type expects no response"))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut correlations = self.correlations.lock().await;
            correlations.insert(handle, Correlation { expected_response, waiter: tx });
        }

        let message = IpcMessage::new(message_type, handle, body);
        if let Err(err) = self.transport.send(message.to_bytes()) {
            self.correlations.lock().await.remove(&handle);
            return Err(err);
        }

        let result = tokio::time::timeout(IPC_WAIT_TIMEOUT, rx).await;
        self.correlations.lock().await.remove(&handle);
        match result {
            Ok(Ok(response)) => response,
            Ok(Err(_recv_error)) => Err(SMBError::ipc_error(IpcError::DaemonUnavailable)),
            Err(_timeout) => {
                warn!(handle, "ipc request timed out after 2s");
                Err(SMBError::ipc_error(IpcError::Timeout))
            }
        }
    }

    /// `TREE_DISCONNECT_REQ`, `LOGOUT_REQ`, `SHUTTING_DOWN`: sent without a
    /// waiter.
    pub fn send_fire_and_forget(&self, message_type: MessageType, handle: u32, body: &[u8]) -> SMBResult<()> {
        debug_assert!(message_type.is_fire_and_forget());
        let message = IpcMessage::new(message_type, handle, body);
        self.transport.send(message.to_bytes())
    }

    /// Dispatches one inbound message from the transport. Tolerates spurious
    /// wakeups (no correlation for the handle - logged and ignored),
    /// duplicate responses (first wins; the correlation is gone by the time
    /// the duplicate arrives, so it is ignored), and unknown message types.
    pub async fn handle_inbound(&self, bytes: &[u8]) {
        let message = match IpcMessage::from_bytes(bytes) {
            Ok(m) => m,
            Err(err) => {
                warn!(%err, "dropping malformed ipc message");
                return;
            }
        };
        let Some(received_type) = MessageType::from_u32(message.message_type) else {
            warn!(message_type = message.message_type, "unknown ipc message type, ignoring");
            return;
        };
        let Ok(handle) = message.handle() else {
            warn!("ipc message missing handle, ignoring");
            return;
        };

        let mut correlations = self.correlations.lock().await;
        let Some(correlation) = correlations.remove(&handle) else {
            debug!(handle, "ipc response for unknown or already-completed handle, ignoring");
            return;
        };
        drop(correlations);

        let body = message.body().to_vec();
        let outcome = if received_type == correlation.expected_response {
            Ok(body)
        } else {
            warn!(
                handle,
                expected = correlation.expected_response as u32,
                actual = received_type as u32,
                "ipc response type mismatch"
            );
            Err(SMBError::ipc_error(IpcError::TypeMismatch {
                expected: correlation.expected_response as u32,
                actual: received_type as u32,
            }))
        };
        let _ = correlation.waiter.send(outcome);
    }

    /// First `STARTING_UP` registers the daemon unconditionally and seeds
    /// `config` from its payload (signing policy, netbios name, server
    /// string, workgroup, min/max protocol), per `handle_startup_event`'s
    /// `else` branch. A second `STARTING_UP` while one is already registered
    /// heartbeats the incumbent first: if the heartbeat succeeds the new
    /// registration is rejected (config untouched); otherwise the incumbent
    /// is replaced by taking over its identity without re-parsing `payload`,
    /// matching the source's "Reconnect to a new user space daemon" path,
    /// which falls through to claiming the new pid without re-reading the
    /// startup request fields.
    pub async fn accept_startup(&self, handle: u32, payload: &[u8], config: &Mutex<GlobalConfig>) -> SMBResult<bool> {
        let mut identity = self.daemon.lock().await;
        if !identity.registered {
            let fields = parse_startup_payload(payload)?;
            let mut cfg = config.lock().await;
            cfg.server_signing = fields.signing;
            cfg.netbios_name = fields.netbios_name;
            cfg.server_string = fields.server_string;
            cfg.workgroup = fields.work_group;
            if fields.min_prot.is_some() {
                cfg.server_min_protocol = fields.min_prot;
            }
            if fields.max_prot.is_some() {
                cfg.server_max_protocol = fields.max_prot;
            }
            drop(cfg);
            identity.registered = true;
            return Ok(true);
        }
        drop(identity);

        let heartbeat = self.send_request(MessageType::HeartbeatReq, handle, &[]).await;
        let mut identity = self.daemon.lock().await;
        match heartbeat {
            Ok(_) => Ok(false),
            Err(_) => {
                identity.registered = true;
                Ok(true)
            }
        }
    }

    pub async fn is_daemon_registered(&self) -> bool {
        self.daemon.lock().await.registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    impl IpcTransport for RecordingTransport {
        fn send(&self, bytes: Vec<u8>) -> SMBResult<()> {
            self.sent.lock().unwrap().push(bytes);
            Ok(())
        }
    }

    struct SilentTransport;
    impl IpcTransport for SilentTransport {
        fn send(&self, _bytes: Vec<u8>) -> SMBResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn response_wakes_the_correct_waiter() {
        let transport = Arc::new(RecordingTransport { sent: StdMutex::new(Vec::new()) });
        let bridge = Arc::new(IpcBridge::new(transport.clone()));

        let bridge2 = bridge.clone();
        let request = tokio::spawn(async move { bridge2.send_request(MessageType::LoginReq, 9, b"alice").await });

        // Give send_request a chance to register its correlation entry.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let response = IpcMessage::new(MessageType::LoginResp, 9, b"ok");
        bridge.handle_inbound(&response.to_bytes()).await;

        let result = request.await.unwrap().unwrap();
        assert_eq!(result, b"ok");
    }

    #[tokio::test]
    async fn request_times_out_after_two_seconds_when_daemon_is_silent() {
        tokio::time::pause();
        let transport = Arc::new(SilentTransport);
        let bridge = IpcBridge::new(transport);

        let start = tokio::time::Instant::now();
        let fut = bridge.send_request(MessageType::LoginReq, 3, b"alice");
        tokio::pin!(fut);
        tokio::time::advance(IPC_WAIT_TIMEOUT + Duration::from_millis(100)).await;
        let result = fut.await;
        assert!(matches!(result, Err(SMBError::Ipc(IpcError::Timeout))));
        assert!(start.elapsed() >= IPC_WAIT_TIMEOUT);
    }

    #[tokio::test]
    async fn type_mismatch_still_wakes_waiter_with_an_error() {
        let transport = Arc::new(RecordingTransport { sent: StdMutex::new(Vec::new()) });
        let bridge = Arc::new(IpcBridge::new(transport));
        let bridge2 = bridge.clone();
        let request = tokio::spawn(async move { bridge2.send_request(MessageType::LoginReq, 1, b"x").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let wrong = IpcMessage::new(MessageType::TreeConnectResp, 1, b"oops");
        bridge.handle_inbound(&wrong.to_bytes()).await;
        let result = request.await.unwrap();
        assert!(matches!(result, Err(SMBError::Ipc(IpcError::TypeMismatch { .. }))));
    }

    #[tokio::test]
    async fn duplicate_response_is_ignored_after_first_wins() {
        let transport = Arc::new(RecordingTransport { sent: StdMutex::new(Vec::new()) });
        let bridge = Arc::new(IpcBridge::new(transport));
        let bridge2 = bridge.clone();
        let request = tokio::spawn(async move { bridge2.send_request(MessageType::LoginReq, 5, b"x").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = IpcMessage::new(MessageType::LoginResp, 5, b"first");
        let second = IpcMessage::new(MessageType::LoginResp, 5, b"second");
        bridge.handle_inbound(&first.to_bytes()).await;
        bridge.handle_inbound(&second.to_bytes()).await;
        let result = request.await.unwrap().unwrap();
        assert_eq!(result, b"first");
    }

    fn sample_startup_payload() -> Vec<u8> {
        encode_startup_payload(&StartupFields {
            signing: ServerSigning::Mandatory,
            netbios_name: "CIFSD".to_string(),
            server_string: "Samba 4.0".to_string(),
            work_group: "WORKGROUP".to_string(),
            min_prot: Some("SMB2_02".to_string()),
            max_prot: Some("SMB3_11".to_string()),
        })
    }

    #[tokio::test]
    async fn second_starting_up_replaces_daemon_only_if_heartbeat_fails() {
        tokio::time::pause();
        let transport = Arc::new(SilentTransport);
        let bridge = IpcBridge::new(transport);
        let config = Mutex::new(GlobalConfig::default());
        let payload = sample_startup_payload();
        assert!(bridge.accept_startup(1, &payload, &config).await.unwrap());
        assert!(bridge.is_daemon_registered().await);

        let fut = bridge.accept_startup(2, &payload, &config);
        tokio::pin!(fut);
        tokio::time::advance(IPC_WAIT_TIMEOUT + Duration::from_millis(100)).await;
        let replaced = fut.await.unwrap();
        assert!(replaced, "heartbeat to a silent incumbent should fail, allowing replacement");
    }

    #[tokio::test]
    async fn first_starting_up_seeds_global_config_from_payload() {
        let transport = Arc::new(SilentTransport);
        let bridge = IpcBridge::new(transport);
        let config = Mutex::new(GlobalConfig::default());
        let payload = sample_startup_payload();
        assert!(bridge.accept_startup(1, &payload, &config).await.unwrap());

        let cfg = config.lock().await;
        assert_eq!(cfg.server_signing, ServerSigning::Mandatory);
        assert_eq!(cfg.netbios_name, "CIFSD");
        assert_eq!(cfg.server_string, "Samba 4.0");
        assert_eq!(cfg.workgroup, "WORKGROUP");
        assert_eq!(cfg.server_min_protocol.as_deref(), Some("SMB2_02"));
        assert_eq!(cfg.server_max_protocol.as_deref(), Some("SMB3_11"));
    }

    #[tokio::test]
    async fn replacing_an_incumbent_does_not_reapply_config() {
        tokio::time::pause();
        let transport = Arc::new(SilentTransport);
        let bridge = IpcBridge::new(transport);
        let config = Mutex::new(GlobalConfig::default());
        assert!(bridge.accept_startup(1, &sample_startup_payload(), &config).await.unwrap());

        let second_payload = encode_startup_payload(&StartupFields {
            signing: ServerSigning::Disable,
            netbios_name: "OTHER".to_string(),
            server_string: "ignored".to_string(),
            work_group: "IGNORED".to_string(),
            min_prot: None,
            max_prot: None,
        });
        let fut = bridge.accept_startup(2, &second_payload, &config);
        tokio::pin!(fut);
        tokio::time::advance(IPC_WAIT_TIMEOUT + Duration::from_millis(100)).await;
        assert!(fut.await.unwrap());

        let cfg = config.lock().await;
        assert_eq!(cfg.netbios_name, "CIFSD", "replacement must not re-parse the new payload's config fields");
    }

    #[test]
    fn fire_and_forget_types_marked_correctly() {
        for t in [MessageType::TreeDisconnectReq, MessageType::LogoutReq, MessageType::ShuttingDown] {
            assert!(t.is_fire_and_forget());
        }
    }
}
