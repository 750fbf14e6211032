//! The Observe extension (RFC7641): registration, the monotonic
//! notification counter, and the one-at-a-time pending-notification
//! drain.
//!
//! One bounded `Vec<Option<ObserverSlot>>` plus a `VecDeque<usize>` of
//! indices awaiting a drain tick, serviced from
//! [`Engine::advance`](crate::engine::Engine::advance).

use std::collections::VecDeque;

use coap_msg::{Id, Token};

use crate::config::Observe as ObserveConfig;
use crate::endpoint::Endpoint;
use crate::time::{Deadline, Millis};

/// A handle into the observer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub(crate) usize);

#[derive(Debug, Clone)]
struct ObserverSlot {
  uri: String,
  endpoint: Endpoint,
  token: Token,
  seq: u32,
  /// `Some(mid)` while a CON notification for this observer is
  /// in-flight and unacknowledged.
  awaiting_ack: Option<Id>,
  /// Queued for the next drain tick.
  pending: bool,
}

/// One observer's notification, ready to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
  /// The observer to notify.
  pub observer: ObserverId,
  /// The value to stamp into the outbound message's Observe option.
  pub seq: u32,
  /// Whether this notification should be sent Confirmable (forcing a
  /// fresh liveness check every `refresh_interval` notifications).
  pub confirmable: bool,
}

/// Bounded registry of active Observe relationships across all
/// observable resources.
#[derive(Debug)]
pub struct ObserveTable {
  slots: Vec<Option<ObserverSlot>>,
  capacity: usize,
  queue: VecDeque<usize>,
  refresh_interval: u32,
  con_drain_delay_ms: Millis,
  non_drain_delay_ms: Millis,
  next_drain: Option<Deadline>,
}

impl ObserveTable {
  /// Build a table from [`ObserveConfig`].
  pub fn new(cfg: ObserveConfig) -> Self {
    ObserveTable { slots: Vec::new(),
                   capacity: cfg.max_observers,
                   queue: VecDeque::new(),
                   refresh_interval: cfg.refresh_interval,
                   con_drain_delay_ms: cfg.con_drain_delay_ms,
                   non_drain_delay_ms: cfg.non_drain_delay_ms,
                   next_drain: None }
  }

  fn live_count(&self) -> usize {
    self.slots.iter().filter(|s| s.is_some()).count()
  }

  /// Register `endpoint`/`token` as an observer of `uri`. Idempotent:
  /// re-registering the same `(endpoint, token)` for the same `uri`
  /// resets its sequence counter, matching a client's Observe=0 replay.
  pub fn register(&mut self, uri: &str, endpoint: Endpoint, token: Token) -> Option<ObserverId> {
    if let Some(ix) = self.find_index(uri, endpoint, &token) {
      if let Some(slot) = &mut self.slots[ix] {
        slot.seq = 0;
      }
      return Some(ObserverId(ix));
    }

    if self.live_count() >= self.capacity {
      log::debug!("{endpoint}: observer table full, rejecting registration for {uri}");
      return None;
    }

    log::trace!("{endpoint}: registering observer for {uri}");
    let slot = ObserverSlot { uri: uri.to_string(),
                              endpoint,
                              token,
                              seq: 0,
                              awaiting_ack: None,
                              pending: false };

    if let Some((ix, free)) = self.slots.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
      *free = Some(slot);
      Some(ObserverId(ix))
    } else {
      self.slots.push(Some(slot));
      Some(ObserverId(self.slots.len() - 1))
    }
  }

  fn find_index(&self, uri: &str, endpoint: Endpoint, token: &Token) -> Option<usize> {
    self.slots.iter().enumerate().find_map(|(ix, slot)| match slot {
                                    | Some(s) if s.uri == uri && s.endpoint == endpoint && &s.token == token => {
                                      Some(ix)
                                    },
                                    | _ => None,
                                  })
  }

  /// Remove an observer outright (the client sent `Observe=1`, or its
  /// resource was deleted).
  pub fn deregister(&mut self, id: ObserverId) {
    if let Some(slot) = self.slots.get_mut(id.0) {
      *slot = None;
    }
    self.queue.retain(|&ix| ix != id.0);
  }

  /// Remove the observer matching `endpoint`/`token`, if any.
  pub fn remove_by_token(&mut self, endpoint: Endpoint, token: &Token) {
    if let Some(ix) = self.slots.iter().enumerate().find_map(|(ix, slot)| match slot {
                                             | Some(s) if s.endpoint == endpoint && &s.token == token => Some(ix),
                                             | _ => None,
                                           })
    {
      self.deregister(ObserverId(ix));
    }
  }

  /// Remove every observer registered against `uri` (the resource was
  /// removed or stopped being observable).
  pub fn remove_by_uri(&mut self, uri: &str) {
    let ixs: Vec<usize> = self.slots
                              .iter()
                              .enumerate()
                              .filter_map(|(ix, s)| s.as_ref().filter(|s| s.uri == uri).map(|_| ix))
                              .collect();
    for ix in ixs {
      self.deregister(ObserverId(ix));
    }
  }

  /// Remove every observer registered from `endpoint`. Called when a
  /// Confirmable notification to it exhausts its retransmissions — a
  /// silently-departed client shouldn't keep receiving (and burning
  /// transaction slots on) notifications.
  pub fn remove_by_client(&mut self, endpoint: Endpoint) {
    let ixs: Vec<usize> = self.slots
                              .iter()
                              .enumerate()
                              .filter_map(|(ix, s)| s.as_ref().filter(|s| s.endpoint == endpoint).map(|_| ix))
                              .collect();
    if !ixs.is_empty() {
      log::debug!("{endpoint}: dropping {} observation(s), client unresponsive", ixs.len());
    }
    for ix in ixs {
      self.deregister(ObserverId(ix));
    }
  }

  /// The URI an observer registered against.
  pub fn uri(&self, id: ObserverId) -> Option<&str> {
    self.slots[id.0].as_ref().map(|s| s.uri.as_str())
  }

  /// Iterate the ids of every currently-registered observer.
  pub fn ids(&self) -> impl Iterator<Item = ObserverId> + '_ {
    self.slots.iter().enumerate().filter_map(|(ix, s)| s.as_ref().map(|_| ObserverId(ix)))
  }

  /// The endpoint and token an observer registered with.
  pub fn endpoint_and_token(&self, id: ObserverId) -> Option<(Endpoint, Token)> {
    self.slots[id.0].as_ref().map(|s| (s.endpoint, s.token.clone()))
  }

  /// A value changed at `uri`; move every matching observer (by
  /// `Resource::matches_notify_scope`, applied by the caller) onto the
  /// pending queue and arm the drain timer if it wasn't already
  /// running.
  pub fn notify(&mut self, ids: impl IntoIterator<Item = ObserverId>, now: Millis) {
    let was_empty = self.queue.is_empty();

    for id in ids {
      if let Some(Some(slot)) = self.slots.get_mut(id.0) {
        if !slot.pending {
          slot.pending = true;
          self.queue.push_back(id.0);
        }
      }
    }

    if was_empty && !self.queue.is_empty() {
      self.next_drain = Some(Deadline::after(now, self.non_drain_delay_ms));
    }
  }

  /// Service at most one pending observer's notification, per the
  /// one-at-a-time drain model. Returns the notification to send, if
  /// the drain timer is due and the queue is non-empty.
  pub fn drain_tick(&mut self, now: Millis) -> Option<Notification> {
    let due = self.next_drain.map(|d| d.is_due(now)).unwrap_or(false);
    if !due {
      return None;
    }

    let ix = self.queue.pop_front()?;
    let Some(slot) = self.slots[ix].as_mut() else {
      return self.arm_next_drain(now);
    };

    slot.pending = false;
    slot.seq = slot.seq.wrapping_add(1) & 0x00FF_FFFF;
    let confirmable = slot.seq % self.refresh_interval.max(1) == 0;

    let delay = if confirmable { self.con_drain_delay_ms } else { self.non_drain_delay_ms };
    self.next_drain = if self.queue.is_empty() { None } else { Some(Deadline::after(now, delay)) };

    Some(Notification { observer: ObserverId(ix), seq: slot.seq, confirmable })
  }

  fn arm_next_drain(&mut self, now: Millis) -> Option<Notification> {
    if self.queue.is_empty() {
      self.next_drain = None;
      None
    } else {
      self.next_drain = Some(Deadline::after(now, self.non_drain_delay_ms));
      self.drain_tick(now)
    }
  }

  /// Record that a CON notification was sent for `id` with message id
  /// `mid`, so a later ACK/timeout can be matched back to it.
  pub fn mark_awaiting_ack(&mut self, id: ObserverId, mid: Id) {
    if let Some(Some(slot)) = self.slots.get_mut(id.0) {
      slot.awaiting_ack = Some(mid);
    }
  }

  /// The observer is caught up; drop its in-flight CON bookkeeping.
  pub fn ack_received(&mut self, id: ObserverId) {
    if let Some(Some(slot)) = self.slots.get_mut(id.0) {
      slot.awaiting_ack = None;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::endpoint::IpAddr;

  fn ep() -> Endpoint {
    Endpoint::new(IpAddr::V4([127, 0, 0, 1]), 5683)
  }

  fn cfg() -> ObserveConfig {
    ObserveConfig { max_observers: 2, refresh_interval: 3, con_drain_delay_ms: 1, non_drain_delay_ms: 10 }
  }

  #[test]
  fn registration_reuses_slot_for_same_observer() {
    let mut table = ObserveTable::new(cfg());
    let token = Token::new(vec![1]).unwrap();
    let a = table.register("sensors/temp", ep(), token.clone()).unwrap();
    let b = table.register("sensors/temp", ep(), token).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn full_table_rejects_new_observer() {
    let mut table = ObserveTable::new(cfg());
    table.register("a", ep(), Token::new(vec![1]).unwrap()).unwrap();
    table.register("b", ep(), Token::new(vec![2]).unwrap()).unwrap();
    assert!(table.register("c", ep(), Token::new(vec![3]).unwrap()).is_none());
  }

  #[test]
  fn notify_forces_con_every_refresh_interval() {
    let mut table = ObserveTable::new(cfg());
    let id = table.register("a", ep(), Token::new(vec![1]).unwrap()).unwrap();

    table.notify([id], 0);
    let n1 = table.drain_tick(10).unwrap();
    assert_eq!(n1.seq, 1);
    assert!(!n1.confirmable);

    table.notify([id], 10);
    let n2 = table.drain_tick(20).unwrap();
    assert_eq!(n2.seq, 2);
    assert!(!n2.confirmable);

    table.notify([id], 20);
    let n3 = table.drain_tick(30).unwrap();
    assert_eq!(n3.seq, 3);
    assert!(n3.confirmable);
  }

  #[test]
  fn deregistered_observer_is_skipped_by_drain() {
    let mut table = ObserveTable::new(cfg());
    let id = table.register("a", ep(), Token::new(vec![1]).unwrap()).unwrap();
    table.notify([id], 0);
    table.deregister(id);
    assert!(table.drain_tick(100).is_none());
  }

  #[test]
  fn remove_by_client_drops_all_its_observations() {
    let mut table = ObserveTable::new(cfg());
    table.register("a", ep(), Token::new(vec![1]).unwrap()).unwrap();
    table.register("b", ep(), Token::new(vec![2]).unwrap()).unwrap();
    table.remove_by_client(ep());
    assert!(table.register("a", ep(), Token::new(vec![9]).unwrap()).is_some());
  }
}
