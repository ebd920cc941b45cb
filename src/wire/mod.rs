//! Wire-level framing, protocol negotiation and message codec for the
//! SPARKv1 text protocol.

pub mod codec;
pub mod frame;
pub mod negotiate;

pub use codec::{decode_message, encode_message};
pub use frame::{read_frame, write_frame, MAX_FRAME_PAYLOAD};
pub use negotiate::{negotiate, Role};

/// The only protocol version this crate speaks. Negotiation always settles
/// on this value or fails.
pub const SPARK_V1: &str = "SPARKv1";
