//! Thin process entry point. Module init/teardown, the CLI wrapper, and
//! debug-toggle knobs are left to a real deployment; this just wires a
//! [`smbd::server::Server`] to a listener on [`smbd::connection::SMB_PORT`]
//! and runs the accept loop until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use smb_core::logging::info;
use smb_core::SMBResult;

use tokio_util::sync::CancellationToken;

use smbd::connection::{self, SMB_PORT};
use smbd::ipc::bridge::{IpcBridge, IpcTransport};
use smbd::server::Server;

/// Placeholder transport until a real generic-netlink socket is wired in;
/// the configuration daemon on the other end of it is an external
/// collaborator this crate never implements.
struct UnconnectedTransport;

impl IpcTransport for UnconnectedTransport {
    fn send(&self, _bytes: Vec<u8>) -> SMBResult<()> {
        Err(smb_core::error::SMBError::ipc_error(smb_core::error::IpcError::DaemonUnavailable))
    }
}

#[tokio::main]
async fn main() -> SMBResult<()> {
    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .init();
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], SMB_PORT));
    let listener = connection::bind_listener(addr)?;
    info!(%addr, "smb server listening");

    let server = Server::new(Arc::new(IpcBridge::new(Arc::new(UnconnectedTransport))));
    let sweep_cancel = CancellationToken::new();
    let sweep_handle = tokio::spawn({
        let server = server.clone();
        let sweep_cancel = sweep_cancel.clone();
        async move { server.run_durable_sweep(sweep_cancel).await }
    });

    let result = run_accept_loop(&server, &listener).await;
    sweep_cancel.cancel();
    let _ = sweep_handle.await;
    result
}

async fn run_accept_loop(server: &Arc<Server>, listener: &TcpListener) -> SMBResult<()> {
    loop {
        if server.accept_gate.is_denied() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            continue;
        }
        let (socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                smb_core::logging::error!(%err, "accept failed");
                continue;
            }
        };
        let _ = socket.set_nodelay(true);
        let server = server.clone();
        tokio::spawn(async move {
            let (id, connection, cancel) = server.register_connection(addr.to_string()).await;
            let (mut read_half, _write_half) = socket.into_split();
            loop {
                let read = async {
                    let mut connection = connection.lock().await;
                    connection::read_frame(&mut connection, &mut read_half).await
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = read => match outcome {
                        Ok(connection::ReceiveOutcome::Frame(_frame)) => {
                            // Dispatch seam wiring (session/tree/FID resolution,
                            // handler invocation) is the caller's responsibility
                            // once a PDU decoder is plugged into the dispatch
                            // seam; out of scope here.
                        }
                        Ok(connection::ReceiveOutcome::Idle) | Err(_) => break,
                    },
                }
            }
            server.drop_connection(id).await;
        });
    }
}
