//! TCP transport: connection establishment, protocol negotiation and
//! message exchange, wired to the process runtime.

mod messenger;

pub use messenger::{ConnectionState, TcpMessenger};
