//! The transaction table: bounded, arena-indexed outbound message
//! bookkeeping with retransmission.
//!
//! Backed by a flat `Vec<Option<Slot>>` addressed by a compact
//! [`TxHandle`], giving O(N) walk semantics (`find_by_mid`) without raw
//! pointers or an intrusive list.

use coap_msg::{Id, Message, Token};

use crate::config::Con;
use crate::endpoint::Endpoint;
use crate::retry::{Attempts, RetryTimer, YouShould};
use crate::time::Millis;
use crate::transport::Transport;

/// A handle into the transaction table. Stable until [`TransactionTable::clear`]
/// or natural completion frees the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxHandle(pub(crate) usize);

/// What a transaction's eventual completion or exhaustion should be
/// routed back to. Stands in for the "completion callback + data" the
/// spec's data model describes: rather than storing a closure in the
/// slot, the table tags each transaction with who asked for it, and the
/// caller (engine or client driver) matches on the tag when draining
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
  /// A response is being awaited for a client-issued request, identified
  /// by the client driver's own request id.
  ClientRequest(u32),
  /// An Observe notification was sent as CON and is awaiting its ACK,
  /// identified by the observer's id in the observe table.
  ObserveNotification(u32),
  /// A deferred response to a separate-response request (RFC7252
  /// §5.2.2) is in flight. Nothing further routes on its ACK/RST/
  /// exhaustion beyond the usual retransmission bookkeeping.
  SeparateResponse,
}

#[derive(Debug)]
struct Slot {
  id: Id,
  endpoint: Endpoint,
  token: Token,
  bytes: Vec<u8>,
  con: bool,
  retry: Option<RetryTimer>,
  purpose: Purpose,
}

/// An event yielded by [`TransactionTable::advance`].
#[derive(Debug)]
pub enum Event {
  /// The transaction's retry timer fired; its bytes were resent.
  Retransmitted(TxHandle),
  /// The transaction exhausted its retransmissions without an ACK/RST.
  /// The slot has already been freed.
  Exhausted(TxHandle, Purpose),
}

/// Bounded set of in-flight outbound messages, keyed by `(endpoint, mid)`.
#[derive(Debug)]
pub struct TransactionTable {
  slots: Vec<Option<Slot>>,
  capacity: usize,
}

impl TransactionTable {
  /// Build a table holding at most `capacity` concurrent transactions.
  pub fn new(capacity: usize) -> Self {
    TransactionTable { slots: Vec::new(), capacity }
  }

  /// Reserve a slot for an outbound message and, for CON messages, arm
  /// its retransmission timer. Returns `None` if the table is full.
  ///
  /// Does not send; call [`TransactionTable::send`] to emit the first
  /// attempt through a [`Transport`].
  pub fn new_transaction(&mut self,
                          id: Id,
                          endpoint: Endpoint,
                          token: Token,
                          bytes: Vec<u8>,
                          con: bool,
                          purpose: Purpose,
                          con_cfg: Con,
                          now: Millis)
                          -> Option<TxHandle> {
    if self.live_count() >= self.capacity {
      return None;
    }

    let retry = con.then(|| RetryTimer::new(now, con_cfg.retry_strategy, con_cfg.max_attempts));
    let slot = Slot { id, endpoint, token, bytes, con, retry, purpose };

    if let Some((ix, free)) = self.slots.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
      *free = Some(slot);
      Some(TxHandle(ix))
    } else {
      self.slots.push(Some(slot));
      Some(TxHandle(self.slots.len() - 1))
    }
  }

  fn live_count(&self) -> usize {
    self.slots.iter().filter(|s| s.is_some()).count()
  }

  /// Emit the transaction's serialized bytes via `transport`.
  pub fn send<T: Transport>(&self, handle: TxHandle, transport: &mut T) -> Result<(), T::Error> {
    let slot = self.slots[handle.0].as_ref().expect("send on a freed transaction handle");
    transport.send(slot.endpoint, &slot.bytes)
  }

  /// Drop a transaction without waiting for completion, stopping its
  /// timer. Matches the host-facing `transactions.clear(handle)` API.
  pub fn clear(&mut self, handle: TxHandle) {
    if let Some(slot) = self.slots.get_mut(handle.0) {
      *slot = None;
    }
  }

  /// Look up an in-flight transaction by its mid and originating
  /// endpoint — used to match an inbound ACK/RST to the request (or
  /// response) that provoked it.
  pub fn find_by_mid(&self, id: Id, endpoint: Endpoint) -> Option<TxHandle> {
    self.slots
        .iter()
        .enumerate()
        .find_map(|(ix, slot)| match slot {
          | Some(s) if s.id == id && s.endpoint == endpoint => Some(TxHandle(ix)),
          | _ => None,
        })
  }

  /// The token a transaction was sent with, e.g. to stamp onto the
  /// response delivered to its completion callback.
  pub fn token(&self, handle: TxHandle) -> Option<&Token> {
    self.slots[handle.0].as_ref().map(|s| &s.token)
  }

  /// The purpose a transaction was created for.
  pub fn purpose(&self, handle: TxHandle) -> Option<Purpose> {
    self.slots[handle.0].as_ref().map(|s| s.purpose)
  }

  /// An inbound ACK or RST arrived matching `handle`; free the slot and
  /// report who should be told.
  pub fn complete(&mut self, handle: TxHandle) -> Option<Purpose> {
    self.slots[handle.0].take().map(|s| s.purpose)
  }

  /// Service due retry timers: resend any CON transaction whose timer
  /// has fired, and free + report any that exhausted their attempts.
  pub fn advance<T: Transport>(&mut self, now: Millis, transport: &mut T) -> Vec<Event> {
    let mut events = Vec::new();
    let mut exhausted = Vec::new();

    for (ix, slot) in self.slots.iter_mut().enumerate() {
      let Some(s) = slot else { continue };
      let Some(retry) = s.retry.as_mut() else { continue };

      match retry.what_should_i_do(now) {
        | YouShould::Wait => {},
        | YouShould::Retry => {
          log::trace!("{}: retransmitting mid={}", s.endpoint, s.id.0);
          let _ = transport.send(s.endpoint, &s.bytes);
          events.push(Event::Retransmitted(TxHandle(ix)));
        },
        | YouShould::Cry => {
          log::debug!("{}: exhausted retransmissions for mid={}", s.endpoint, s.id.0);
          exhausted.push((TxHandle(ix), s.purpose));
        },
      }
    }

    for (handle, purpose) in exhausted {
      self.slots[handle.0] = None;
      events.push(Event::Exhausted(handle, purpose));
    }

    events
  }

  /// Does this transaction represent a Confirmable message still
  /// awaiting its ACK?
  pub fn is_con(&self, handle: TxHandle) -> bool {
    self.slots[handle.0].as_ref().map(|s| s.con).unwrap_or(false)
  }

  /// Number of attempts made so far for a still-live transaction.
  pub fn attempts(&self, handle: TxHandle) -> Option<Attempts> {
    self.slots[handle.0].as_ref().and_then(|s| s.retry.as_ref()).map(|r| r.attempts())
  }
}
