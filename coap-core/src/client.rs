//! The client-side Block2 walker: drives a GET across as many Block2
//! exchanges as the server's response requires, accumulating the body
//! until the final block arrives.
//!
//! The host drives everything (`Engine::on_datagram`/`advance`), so a
//! `ClientRequest` is a small state machine the engine feeds response
//! messages into, never touching a socket or a thread itself.

use coap_msg::{Block, Message, MessageOptions, Token};

use crate::endpoint::Endpoint;

/// Where a [`ClientRequest`] stands.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientStatus {
  /// Another Block2 exchange is needed; the engine should send the
  /// request built by [`ClientRequest::next_block_request`].
  More,
  /// The full response body has been assembled and is ready to be
  /// delivered to the caller.
  Response(Message),
  /// The caller has taken the finished response via
  /// [`ClientRequest::take_response`]; nothing left to do.
  Finished,
  /// The underlying transaction exhausted its retransmissions without
  /// a response.
  Timeout,
  /// A Block2 response arrived with an out-of-sequence block number,
  /// or the walk exceeded its attempt ceiling.
  BlockError,
}

/// One in-progress client request, possibly spanning several Block2
/// exchanges.
#[derive(Debug)]
pub struct ClientRequest {
  endpoint: Endpoint,
  token: Token,
  path: String,
  body: Vec<u8>,
  next_block_num: u32,
  block_size: u16,
  /// Consecutive out-of-sequence blocks seen for the current
  /// `next_block_num`; bounded by `max_attempts` per spec §4.6 step 4.
  /// Reset to zero on every successfully-accepted block.
  block_error: u16,
  max_attempts: u16,
  status: ClientStatus,
}

impl ClientRequest {
  /// Begin a request for `path` at `endpoint`, preferring `block_size`
  /// for any Block2 response it provokes.
  pub fn new(endpoint: Endpoint, token: Token, path: impl Into<String>, block_size: u16, max_attempts: u16) -> Self {
    ClientRequest { endpoint,
                     token,
                     path: path.into(),
                     body: Vec::new(),
                     next_block_num: 0,
                     block_size,
                     block_error: 0,
                     max_attempts,
                     status: ClientStatus::More }
  }

  /// The endpoint this request targets.
  pub fn endpoint(&self) -> Endpoint {
    self.endpoint
  }

  /// The token this request (and every Block2 follow-up) carries.
  pub fn token(&self) -> &Token {
    &self.token
  }

  /// Current status.
  pub fn status(&self) -> &ClientStatus {
    &self.status
  }

  /// Feed in a response. Updates and returns the new status.
  ///
  /// On a Block2 response with `more() == true`, the block's payload
  /// is appended and the walker advances to the next block number. A
  /// block arriving with a number other than the one requested is
  /// retried (the same block is re-requested) up to `max_attempts`
  /// times, after which the walk ends in [`ClientStatus::BlockError`].
  /// A response with no Block2 option, or one with `more() == false`,
  /// completes the request.
  pub fn on_response(&mut self, resp: &Message) -> &ClientStatus {
    match resp.block2() {
      | Some(block) if block.num() != self.next_block_num => {
        self.block_error += 1;
        self.status = if self.block_error >= self.max_attempts {
          ClientStatus::BlockError
        } else {
          ClientStatus::More
        };
      },
      | Some(block) if block.more() => {
        self.block_error = 0;
        self.body.extend_from_slice(resp.get_payload());
        self.next_block_num += 1;
        self.block_size = block.size();
        self.status = ClientStatus::More;
      },
      | _ => {
        self.block_error = 0;
        self.body.extend_from_slice(resp.get_payload());
        let mut full = resp.clone();
        full.set_payload(std::mem::take(&mut self.body));
        self.status = ClientStatus::Response(full);
      },
    }

    &self.status
  }

  /// The retransmission ceiling for this request's current transaction
  /// was hit without a response.
  pub fn on_timeout(&mut self) {
    self.status = ClientStatus::Timeout;
  }

  /// Build the next Block2 GET to send, if [`ClientRequest::status`]
  /// is [`ClientStatus::More`].
  pub fn next_block_request(&self, mid: coap_msg::Id) -> Option<Message> {
    if !matches!(self.status, ClientStatus::More) {
      return None;
    }

    let mut req = Message::new(coap_msg::Type::Con, coap_msg::Code::GET, mid, self.token.clone());
    let _ = req.set_path(&self.path);
    if let Some(block) = Block::new(self.next_block_num, false, self.block_size) {
      req.set_block2(block);
    }
    Some(req)
  }

  /// Once [`ClientRequest::status`] is [`ClientStatus::Response`],
  /// take the assembled response and mark this request
  /// [`ClientStatus::Finished`].
  pub fn take_response(&mut self) -> Option<Message> {
    match std::mem::replace(&mut self.status, ClientStatus::Finished) {
      | ClientStatus::Response(resp) => Some(resp),
      | other => {
        self.status = other;
        None
      },
    }
  }
}
