//! Transport between the askpass helper and the dispatcher: newline-delimited
//! JSON over a Unix domain socket, one request and one response per
//! connection.

mod client;
mod protocol;
mod server;

pub use client::{TrampolineClient, forwarded_environment};
pub use protocol::{ProtocolError, TrampolineRequest, TrampolineResponse};
pub use server::{ShutdownHandle, TrampolineServer};
