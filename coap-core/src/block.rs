//! Blockwise transfer (RFC7959): Block1 request-body reassembly and
//! Block2 response-body slicing.
//!
//! Reassembly state is a small bounded table keyed by `(endpoint,
//! token)`, consistent with how [`crate::transaction::TransactionTable`]
//! and [`crate::observe::ObserveTable`] represent in-flight state.

use coap_msg::{Block, Token};

use crate::endpoint::Endpoint;

/// What happened after feeding a chunk into a [`Block1Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block1Outcome {
  /// The chunk was accepted and more are expected; respond
  /// `2.31 Continue` echoing the same block descriptor.
  Continue,
  /// The final chunk arrived; the full body is returned.
  Complete(Vec<u8>),
  /// The reassembled body would exceed the configured maximum;
  /// the buffer for this `(endpoint, token)` has been dropped.
  TooLarge,
  /// `block.num()` didn't match the next expected block; the buffer
  /// for this `(endpoint, token)` has been dropped (`4.08`).
  OutOfOrder,
}

#[derive(Debug)]
struct Buffer {
  endpoint: Endpoint,
  token: Token,
  body: Vec<u8>,
  next_num: u32,
}

/// Bounded set of in-progress Block1 reassemblies.
#[derive(Debug)]
pub struct Block1Reassembler {
  buffers: Vec<Buffer>,
  max_size: usize,
}

impl Block1Reassembler {
  /// Build a reassembler that rejects any body growing past `max_size`
  /// bytes.
  pub fn new(max_size: usize) -> Self {
    Block1Reassembler { buffers: Vec::new(), max_size }
  }

  fn find(&mut self, endpoint: Endpoint, token: &Token) -> Option<usize> {
    self.buffers.iter().position(|b| b.endpoint == endpoint && &b.token == token)
  }

  /// Feed one Block1 chunk in from `endpoint`/`token`.
  pub fn accept(&mut self, endpoint: Endpoint, token: Token, block: Block, chunk: &[u8]) -> Block1Outcome {
    let ix = self.find(endpoint, &token);

    let expected_num = match ix {
      | Some(ix) => self.buffers[ix].next_num,
      | None => 0,
    };

    if block.num() != expected_num {
      if let Some(ix) = ix {
        self.buffers.remove(ix);
      }
      return Block1Outcome::OutOfOrder;
    }

    let ix = match ix {
      | Some(ix) => ix,
      | None => {
        self.buffers.push(Buffer { endpoint, token, body: Vec::new(), next_num: 0 });
        self.buffers.len() - 1
      },
    };

    if self.buffers[ix].body.len() + chunk.len() > self.max_size {
      self.buffers.remove(ix);
      return Block1Outcome::TooLarge;
    }

    self.buffers[ix].body.extend_from_slice(chunk);
    self.buffers[ix].next_num += 1;

    if block.more() {
      Block1Outcome::Continue
    } else {
      let buf = self.buffers.remove(ix);
      Block1Outcome::Complete(buf.body)
    }
  }

  /// Drop any in-progress reassembly for `(endpoint, token)`, e.g. on
  /// transaction exhaustion.
  pub fn abandon(&mut self, endpoint: Endpoint, token: &Token) {
    if let Some(ix) = self.find(endpoint, token) {
      self.buffers.remove(ix);
    }
  }
}

/// Slice `payload` into the Block2 chunk numbered `num` at `size`
/// bytes per block, returning the chunk and whether more blocks follow.
///
/// `size` should be one of [`Block::VALID_SIZES`]; this function only
/// relies on it being nonzero.
pub fn slice(payload: &[u8], num: u32, size: u16) -> (&[u8], bool) {
  let size = size as usize;
  let start = (num as usize).saturating_mul(size).min(payload.len());
  let end = start.saturating_add(size).min(payload.len());
  let more = end < payload.len();
  (&payload[start..end], more)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::endpoint::IpAddr;

  fn ep() -> Endpoint {
    Endpoint::new(IpAddr::V4([127, 0, 0, 1]), 5683)
  }

  #[test]
  fn reassembles_three_in_order_blocks() {
    let mut r = Block1Reassembler::new(1024);
    let token = Token::new(vec![1]).unwrap();

    let b0 = Block::new(0, true, 16).unwrap();
    assert_eq!(r.accept(ep(), token.clone(), b0, &[0u8; 16]), Block1Outcome::Continue);

    let b1 = Block::new(1, true, 16).unwrap();
    assert_eq!(r.accept(ep(), token.clone(), b1, &[1u8; 16]), Block1Outcome::Continue);

    let b2 = Block::new(2, false, 16).unwrap();
    match r.accept(ep(), token, b2, &[2u8; 4]) {
      | Block1Outcome::Complete(body) => assert_eq!(body.len(), 36),
      | other => panic!("expected Complete, got {other:?}"),
    }
  }

  #[test]
  fn out_of_order_block_is_rejected_and_drops_buffer() {
    let mut r = Block1Reassembler::new(1024);
    let token = Token::new(vec![1]).unwrap();

    let b0 = Block::new(0, true, 16).unwrap();
    r.accept(ep(), token.clone(), b0, &[0u8; 16]);

    let b2 = Block::new(2, false, 16).unwrap();
    assert_eq!(r.accept(ep(), token.clone(), b2, &[9u8; 16]), Block1Outcome::OutOfOrder);

    let b1 = Block::new(1, true, 16).unwrap();
    assert_eq!(r.accept(ep(), token, b1, &[1u8; 16]), Block1Outcome::OutOfOrder);
  }

  #[test]
  fn oversized_body_is_rejected() {
    let mut r = Block1Reassembler::new(20);
    let token = Token::new(vec![1]).unwrap();

    let b0 = Block::new(0, true, 16).unwrap();
    assert_eq!(r.accept(ep(), token.clone(), b0, &[0u8; 16]), Block1Outcome::Continue);

    let b1 = Block::new(1, false, 16).unwrap();
    assert_eq!(r.accept(ep(), token, b1, &[1u8; 16]), Block1Outcome::TooLarge);
  }

  #[test]
  fn block2_slice_marks_last_chunk() {
    let payload = vec![0u8; 100];
    let (chunk, more) = slice(&payload, 0, 64);
    assert_eq!(chunk.len(), 64);
    assert!(more);

    let (chunk, more) = slice(&payload, 1, 64);
    assert_eq!(chunk.len(), 36);
    assert!(!more);
  }

  #[test]
  fn block2_slice_past_end_is_empty() {
    let payload = vec![0u8; 10];
    let (chunk, more) = slice(&payload, 5, 64);
    assert!(chunk.is_empty());
    assert!(!more);
  }
}
