//! The outbound seam the engine sends bytes through.
//!
//! Narrowed to exactly one operation: `send(endpoint, bytes)`. `Transport`
//! owns no `recv`/`poll` side — inbound datagrams are pushed into the
//! engine by the host via
//! [`Engine::on_datagram`](crate::engine::Engine::on_datagram) instead of
//! pulled, since the host (not the engine) owns the event loop.

use crate::endpoint::Endpoint;

/// A one-datagram-per-call send seam.
///
/// A `SecureTransport` (DTLS) implementation satisfies the same trait;
/// from the engine's perspective the only difference is which
/// [`Endpoint`]s it is asked to send to (`secure == true`).
pub trait Transport {
  /// The error a send can fail with.
  type Error: core::fmt::Debug;

  /// Send `bytes` to `endpoint` as a single datagram.
  fn send(&mut self, endpoint: Endpoint, bytes: &[u8]) -> Result<(), Self::Error>;
}
