//! Engine-level error type.
//!
//! A contextless `What` paired with a `When` describing the entry point
//! the error surfaced from, rather than one flat enum.

use coap_msg::{MessageParseError, MessageToBytesError};

use crate::endpoint::Endpoint;

/// The entry point active when an [`Error`] occurred.
#[derive(Debug, Clone, Copy)]
pub enum When {
  /// Handling an inbound datagram via [`Engine::on_datagram`](crate::engine::Engine::on_datagram).
  Receiving(Endpoint),
  /// Sending a message to `endpoint`.
  Sending(Endpoint),
  /// Ticking the engine's internal timers via [`Engine::advance`](crate::engine::Engine::advance).
  Advancing,
  /// No specific entry point; a general-purpose construction error.
  None,
}

/// An error surfaced by the engine, together with the context it
/// occurred in.
#[derive(Debug)]
pub struct Error {
  /// What happened.
  pub what: What,
  /// What the engine was doing when it happened.
  pub when: When,
}

impl Error {
  /// Build an error from a `when` context and a `what` reason.
  pub fn new(when: When, what: What) -> Self {
    Error { when, what }
  }
}

/// A contextless reason an engine operation failed.
#[derive(Debug)]
pub enum What {
  /// The inbound datagram did not parse as a CoAP message.
  FromBytes(MessageParseError),
  /// An outbound message failed to serialize.
  ToBytes(MessageToBytesError),
  /// The transaction table had no free slot for a new outbound message.
  TransactionTableFull,
  /// The observer table had no free slot for a new registration.
  ObserverTableFull,
  /// A CONfirmable message exhausted its retransmissions without an ACK.
  MessageNeverAcked,
  /// The transport reported a send failure.
  TransportError,
  /// A Block1 reassembly buffer received an out-of-order chunk.
  BlockOutOfOrder,
  /// A Block1 aggregate exceeded [`crate::config::Block::max_reassembly_size`].
  BlockTooLarge,
}
