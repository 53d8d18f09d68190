//! SKIFF Transport
//!
//! Request/response protocol between two peers migrating a computation:
//! `Execute` hands over a snapshot (or starts a fresh run), `Finish` tells
//! the other side the computation is done.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::PeerClient;
pub use error::TransportError;
pub use protocol::{ExecuteRequest, ExecuteResponse, FinishRequest, FinishResponse};
pub use server::{ExecutorService, PeerServer};
