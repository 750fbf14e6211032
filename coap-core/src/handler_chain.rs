//! The custom handler chain: middleware consulted before resource
//! dispatch, e.g. for cross-cutting concerns like authentication or a
//! catch-all `.well-known/core` responder.
//!
//! A sequence of things that each get a chance to act on a request,
//! represented as a concrete `Vec<Box<dyn ChainHandler>>` walked in
//! order.

use core::fmt;

use coap_msg::Message;

/// What a [`ChainHandler`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// This handler had no opinion; give the next handler (or the
  /// resource registry) a turn.
  Continue,
  /// This handler produced a final response; stop here.
  Processed,
}

/// One link in the [`HandlerChain`].
pub trait ChainHandler {
  /// Inspect (and possibly answer) `req`.
  fn handle(&mut self, req: &Message, resp: &mut Message) -> Outcome;
}

impl<F: FnMut(&Message, &mut Message) -> Outcome> ChainHandler for F {
  fn handle(&mut self, req: &Message, resp: &mut Message) -> Outcome {
    self(req, resp)
  }
}

/// An ordered sequence of [`ChainHandler`]s run before resource
/// dispatch. The first to return [`Outcome::Processed`] wins.
#[derive(Default)]
pub struct HandlerChain {
  handlers: Vec<Box<dyn ChainHandler>>,
}

impl fmt::Debug for HandlerChain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandlerChain").field("handlers", &self.handlers.len()).finish()
  }
}

impl HandlerChain {
  /// An empty chain.
  pub fn new() -> Self {
    HandlerChain::default()
  }

  /// Append a handler to the end of the chain.
  pub fn add(&mut self, handler: impl ChainHandler + 'static) {
    self.handlers.push(Box::new(handler));
  }

  /// Run the chain over `req`, stopping at the first handler that
  /// processes it. Returns `true` iff some handler did.
  pub fn run(&mut self, req: &Message, resp: &mut Message) -> bool {
    for handler in self.handlers.iter_mut() {
      if let Outcome::Processed = handler.handle(req, resp) {
        return true;
      }
    }
    false
  }
}
