//! Separate-response continuations (RFC7252 §5.2.2).
//!
//! When a [`crate::resource::Handler`] returns
//! [`crate::resource::HandlerOutcome::Deferred`], the engine sends an
//! empty ACK immediately and, per [`crate::engine::Engine::on_datagram`]'s
//! contract, hands the host a `SeparateResponse` (via
//! [`crate::engine::EngineEvent::SeparateResponseStarted`]) capturing
//! everything needed to answer later, out of band, from whatever
//! asynchronous context eventually produces the real response (a
//! sensor read completing, a write landing on flash, etc.) — a value
//! the host can carry across its own async boundary and hand back to
//! [`crate::engine::Engine::resume_separate`] once the real answer is
//! ready.

use coap_msg::{Block, Code, Id, Message, MessageOptions, Token, Type};

use crate::endpoint::Endpoint;

/// Everything needed to send the real answer to a request that was
/// acknowledged empty and deferred.
#[derive(Debug, Clone)]
pub struct SeparateResponse {
  endpoint: Endpoint,
  token: Token,
  path: String,
  block2: Option<Block>,
}

impl SeparateResponse {
  /// Capture the continuation for `req`, arriving from `endpoint`.
  pub fn capture(req: &Message, endpoint: Endpoint) -> Self {
    SeparateResponse { endpoint,
                        token: req.token.clone(),
                        path: req.path().unwrap_or_default(),
                        block2: req.block2() }
  }

  /// The endpoint the eventual response must be sent to.
  pub fn endpoint(&self) -> Endpoint {
    self.endpoint
  }

  /// The Block2 descriptor the original request carried, if any —
  /// negotiated independently of whether the request itself used
  /// Block1.
  pub fn requested_block2(&self) -> Option<Block> {
    self.block2
  }

  /// Build the final response message, to be handed to the engine for
  /// sending as a new Confirmable message (it is no longer piggy-backed
  /// on anything, so it gets a fresh message id from the caller).
  pub fn resume(&self, mid: Id, code: Code, payload: Vec<u8>) -> Message {
    let mut resp = Message::new(Type::Con, code, mid, self.token.clone());
    let _ = resp.set_path(&self.path);
    resp.set_payload(payload);
    resp
  }
}

#[cfg(test)]
mod tests {
  use coap_msg::{Id as MsgId, Token as MsgToken};

  use super::*;
  use crate::endpoint::IpAddr;

  #[test]
  fn resume_carries_the_original_token() {
    let ep = Endpoint::new(IpAddr::V4([127, 0, 0, 1]), 5683);
    let mut req = Message::new(Type::Con, Code::GET, MsgId(1), MsgToken::new(vec![7]).unwrap());
    req.set_path("slow").unwrap();

    let cont = SeparateResponse::capture(&req, ep);
    let resp = cont.resume(MsgId(2), Code::CONTENT, b"done".to_vec());

    assert_eq!(resp.token, MsgToken::new(vec![7]).unwrap());
    assert_eq!(resp.ty, Type::Con);
    assert_eq!(resp.get_payload(), b"done");
  }

  #[test]
  fn captures_requested_block2_preference() {
    let ep = Endpoint::new(IpAddr::V4([127, 0, 0, 1]), 5683);
    let mut req = Message::new(Type::Con, Code::GET, MsgId(1), MsgToken::new(vec![7]).unwrap());
    req.set_path("slow").unwrap();
    req.set_block2(Block::new(0, false, 64).unwrap());

    let cont = SeparateResponse::capture(&req, ep);
    assert_eq!(cont.requested_block2(), Some(Block::new(0, false, 64).unwrap()));
  }
}
