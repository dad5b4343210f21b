//! Duplex JSON-RPC plumbing shared by the bridge and the host.

pub mod message;
pub mod multiplexer;
pub mod outbound;

pub use message::{Message, Request, Response, RpcError};
pub use multiplexer::{CallError, Multiplexer, PendingCall};
pub use outbound::Outbound;
