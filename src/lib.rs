//! `sparklink` is an Erlang-inspired process runtime paired with a small
//! peer-to-peer file-transfer protocol: isolated processes with bounded
//! mailboxes and link-based fate-sharing, a length-prefixed text wire
//! format negotiated between an initiator and a responder, and a
//! block-oriented transfer actor that drives a file to completion in
//! either direction over that wire.
//!
//! The runtime ([`process`]) is domain-agnostic; everything downstream of
//! it ([`message`], [`wire`], [`net`], [`transfer`], [`service`]) is built
//! on top of plain processes and mailboxes, the way application code would
//! use the runtime rather than how the runtime is implemented.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod net;
pub mod notifier;
pub mod process;
pub mod service;
pub mod transfer;
pub mod value;
pub mod wire;

pub use config::{MessengerConfig, RuntimeConfig, TransferConfig};
pub use error::{RuntimeError, SparkError, TransferError, WireError};
pub use message::Message;
pub use net::TcpMessenger;
pub use service::Session;
pub use transfer::Transfer;
pub use value::{Pattern, Value};
