//! Runtime configuration: retry strategies, transaction/observer table
//! sizes, and blockwise tunables.
//!
//! Numeric defaults follow [RFC7252 §4.8](https://datatracker.ietf.org/doc/html/rfc7252#section-4.8)
//! (`RESPONSE_TIMEOUT = 2000ms`, `RANDOM_FACTOR = 1.5`, `MAX_RETRANSMIT = 4`)
//! and the Observe/blockwise constants conventionally named
//! `COAP_OBSERVE_REFRESH_INTERVAL = 20` and `COAP_MAX_CHUNK_SIZE = 64`.

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Configuration for outbound Confirmable (CON) messages: the
/// retransmission schedule and the retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Con {
  /// Retry strategy for CON requests.
  ///
  /// Defaults to the RFC7252 contract: jittered initial timeout in
  /// `[2000, 3000]` ms, doubling each attempt.
  pub retry_strategy: Strategy,
  /// Number of times a CON message may be resent before the
  /// transaction is considered dead.
  ///
  /// Defaults to 4, matching `COAP_MAX_RETRANSMIT`.
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { retry_strategy: Strategy::Exponential { init_min: 2000, init_max: 3000 },
          max_attempts: Attempts(4) }
  }
}

/// Configuration for message-level bookkeeping: token generation and
/// per-message-class retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg {
  /// Seed mixed into opaque token derivation (see [`coap_msg::Token::opaque`]),
  /// letting distinct hosts generate distinguishable tokens.
  pub token_seed: u64,
  /// See [`Con`].
  pub con: Con,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0, con: Con::default() }
  }
}

/// Observe subsystem tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observe {
  /// Maximum number of observers held across both the `unactive` and
  /// `pending` lists.
  pub max_observers: usize,
  /// Force a CON notification (instead of NON) every `refresh_interval`
  /// notifications, so silently-departed clients are detected.
  ///
  /// Defaults to 20, matching `COAP_OBSERVE_REFRESH_INTERVAL`.
  pub refresh_interval: u32,
  /// Delay between servicing successive entries of the `pending` queue
  /// when the last notification sent was CON and awaiting an ACK.
  pub con_drain_delay_ms: Millis,
  /// Delay between servicing successive entries of the `pending` queue
  /// when the last notification sent was NON.
  pub non_drain_delay_ms: Millis,
}

impl Default for Observe {
  fn default() -> Self {
    Observe { max_observers: 16,
              refresh_interval: 20,
              con_drain_delay_ms: 1,
              non_drain_delay_ms: 10 }
  }
}

/// Blockwise transfer tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
  /// Block size the engine prefers when slicing an oversized response,
  /// chosen from [`coap_msg::Block::VALID_SIZES`].
  ///
  /// Defaults to 64, matching `COAP_MAX_CHUNK_SIZE`.
  pub preferred_size: u16,
  /// Largest Block1 request body the server will reassemble before
  /// replying `4.13 Request Entity Too Large`.
  pub max_reassembly_size: usize,
}

impl Default for Block {
  fn default() -> Self {
    Block { preferred_size: 64, max_reassembly_size: 4096 }
  }
}

/// Top-level runtime configuration, threaded into [`Engine::new`](crate::engine::Engine::new).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// See [`Msg`].
  pub msg: Msg,
  /// See [`Observe`].
  pub observe: Observe,
  /// See [`Block`].
  pub block: Block,
  /// Maximum number of in-flight outbound transactions.
  ///
  /// Defaults to 4, matching `COAP_MAX_OPEN_TRANSACTIONS`.
  pub max_transactions: usize,
  /// Maximum attempts the client request driver allows a single Block2
  /// block to be misordered before giving up with `BLOCK_ERROR`.
  pub max_block_attempts: u16,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             observe: Observe::default(),
             block: Block::default(),
             max_transactions: 4,
             max_block_attempts: 4 }
  }
}
