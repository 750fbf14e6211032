//! Structured-ish log line helpers: small free functions building a
//! one-line summary, logged by callers through the `log` crate's global
//! logger rather than a bespoke sink.

use coap_msg::{Code, Id, MessageOptions, Type};

pub(crate) fn msg_summary<M: MessageOptions>(ty: Type, code: Code, id: Id, msg: &M) -> String {
  format!("{ty:?} {code} mid={} path={:?}", id.0, msg.path().unwrap_or_default())
}
