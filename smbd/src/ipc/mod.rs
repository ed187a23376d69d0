//! Control-plane IPC bridge to the user-space configuration daemon: wire
//! message shape ([`message`]) and the correlated request/response channel
//! built on top of it ([`bridge`]).

pub mod bridge;
pub mod message;

pub use bridge::{IpcBridge, IpcTransport, IPC_WAIT_TIMEOUT};
pub use message::{IpcMessage, MessageType, IPC_PROTOCOL_VERSION};
