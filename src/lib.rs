//! A user-space TCP endpoint state machine: wrapping sequence numbers, a
//! capacity-bounded byte stream, an out-of-order reassembler, and the
//! receiver/sender/connection trio that drive them against a peer speaking
//! real TCP. Congestion control, SACK, urgent data, and option negotiation
//! beyond a fixed MSS are out of scope; see `tcp::connection` for the
//! shutdown and retransmission rules that are in scope.

pub mod tcp;

pub use tcp::byte_stream::ByteStream;
pub use tcp::connection::{Config, TcpConnection};
pub use tcp::reassembler::Reassembler;
pub use tcp::receiver::TcpReceiver;
pub use tcp::segment::{Tcp4Tuple, TcpSegment};
pub use tcp::sender::TcpSender;
pub use tcp::state::State;
pub use tcp::wrap::Wrap32;
