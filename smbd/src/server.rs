//! The composite "Server" handle: the global mutable state otherwise
//! scattered across the share list, session hash, persistent-id table, and
//! IPC bridge is bundled into one handle created at startup and threaded
//! explicitly through every operation. Each sub-table keeps its own interior
//! locking so callers only ever hold one lock at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use smb_core::logging::{debug, info};

use crate::config::GlobalConfig;
use crate::connection::{AcceptGate, Connection};
use crate::handle::{InodeTable, PersistentTable};
use crate::ipc::bridge::IpcBridge;
use crate::session::SessionTable;
use crate::share::ShareRegistry;

/// A live connection plus the token its receive-loop task selects on so
/// `close_server` can wake a blocked receiver without reaching into the
/// task directly. `connection` is shared with the owning per-connection task
/// via its own mutex so `close_server` only ever needs the table lock for as
/// long as it takes to mark each entry and cancel its token.
pub struct ConnectionEntry {
    pub connection: Arc<Mutex<Connection>>,
    pub cancel: CancellationToken,
}

/// How often [`Server::run_durable_sweep`] checks for expired detached
/// durable/persistent handles.
pub const DURABLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Server {
    pub config: Mutex<GlobalConfig>,
    pub shares: Mutex<ShareRegistry>,
    pub sessions: Mutex<SessionTable>,
    pub persistent_handles: Mutex<PersistentTable>,
    pub inodes: Mutex<InodeTable>,
    pub ipc: Arc<IpcBridge>,
    pub connections: Mutex<HashMap<u64, ConnectionEntry>>,
    pub accept_gate: Arc<AcceptGate>,
    next_connection_id: AtomicU64,
}

impl Server {
    pub fn new(ipc: Arc<IpcBridge>) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(GlobalConfig::default()),
            shares: Mutex::new(ShareRegistry::new()),
            sessions: Mutex::new(SessionTable::new()),
            persistent_handles: Mutex::new(PersistentTable::new()),
            inodes: Mutex::new(InodeTable::new()),
            ipc,
            connections: Mutex::new(HashMap::new()),
            accept_gate: Arc::new(AcceptGate::new()),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Registers a freshly-accepted connection and returns its id, its
    /// shared [`Connection`] state, and the cancellation token its receive
    /// loop should select on.
    pub async fn register_connection(&self, peer_addr: String) -> (u64, Arc<Mutex<Connection>>, CancellationToken) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let connection = Arc::new(Mutex::new(Connection::new(id, peer_addr)));
        let entry = ConnectionEntry { connection: connection.clone(), cancel: cancel.clone() };
        self.connections.lock().await.insert(id, entry);
        (id, connection, cancel)
    }

    /// Removes a connection once its receive loop has exited and every
    /// session it owned has been drained.
    pub async fn drop_connection(&self, id: u64) {
        self.connections.lock().await.remove(&id);
        debug!(connection = id, "connection removed");
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// `close_server`: (1) deny new connections; (2) stop every TCP session
    /// (mark `EXITING`, wake its blocked receiver via cancellation - the
    /// caller is responsible for then dropping the listener and shutting the
    /// write half of each socket); (3)/(4) are the caller's job once this
    /// returns, since they own the listener socket.
    pub async fn close_server(&self) {
        self.accept_gate.deny();
        let connections = self.connections.lock().await;
        for entry in connections.values() {
            entry.connection.lock().await.mark_exiting();
            entry.cancel.cancel();
        }
        info!(live = connections.len(), "close_server: denied new connections, signalled all sessions");
    }

    /// Runs until `cancel` fires, periodically closing every detached
    /// durable/persistent handle whose `durable_timeout` has elapsed.
    pub async fn run_durable_sweep(self: &Arc<Self>, cancel: CancellationToken) {
        let mut ticks = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(DURABLE_SWEEP_INTERVAL));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                tick = ticks.next() => {
                    if tick.is_none() {
                        break;
                    }
                    let expired = self.persistent_handles.lock().await.sweep_expired();
                    if !expired.is_empty() {
                        debug!(count = expired.len(), "swept expired durable handles");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::bridge::IpcTransport;
    use smb_core::SMBResult;

    struct NoopTransport;
    impl IpcTransport for NoopTransport {
        fn send(&self, _bytes: Vec<u8>) -> SMBResult<()> {
            Ok(())
        }
    }

    fn make_server() -> Arc<Server> {
        Server::new(Arc::new(IpcBridge::new(Arc::new(NoopTransport))))
    }

    #[tokio::test]
    async fn close_server_denies_new_connections_and_cancels_live_ones() {
        let server = make_server();
        let (_, connection, cancel) = server.register_connection("10.0.0.1:1234".to_string()).await;
        assert!(!server.accept_gate.is_denied());
        assert!(!cancel.is_cancelled());

        server.close_server().await;

        assert!(server.accept_gate.is_denied());
        assert!(cancel.is_cancelled());
        assert_eq!(connection.lock().await.state, crate::connection::ConnectionState::Exiting);
    }

    #[tokio::test]
    async fn drop_connection_removes_it_from_the_table() {
        let server = make_server();
        let (id, _, _) = server.register_connection("10.0.0.1:1234".to_string()).await;
        assert_eq!(server.connection_count().await, 1);
        server.drop_connection(id).await;
        assert_eq!(server.connection_count().await, 0);
    }
}
