//! The engine: the transport-agnostic core that glues the transaction
//! table, resource registry, handler chain, Observe table, and
//! Block1/Block2 machinery together behind two entry points the host
//! calls as datagrams and time pass: [`Engine::on_datagram`] and
//! [`Engine::advance`].
//!
//! There is no internal thread or event loop here: the host owns the
//! clock and the socket, and the engine only reacts when called.

use coap_msg::{Block, Code, Id, Message, MessageOptions, MessageParseError, Token, Type};

use crate::block::{Block1Outcome, Block1Reassembler};
use crate::client::{ClientRequest, ClientStatus};
use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::{Error, What, When};
use crate::handler_chain::HandlerChain;
use crate::observe::{ObserveTable, ObserverId};
use crate::resource::{HandlerOutcome, Registry};
use crate::separate::SeparateResponse;
use crate::time::Millis;
use crate::transaction::{Event as TxEvent, Purpose, TransactionTable};
use crate::transport::Transport;

/// Something the host should act on as a result of
/// [`Engine::on_datagram`] or [`Engine::advance`].
#[derive(Debug)]
pub enum EngineEvent {
  /// A client request this host issued completed successfully.
  ClientResponse {
    /// The id returned by [`Engine::client_get`].
    request_id: u32,
    /// The assembled response (body concatenated across any Block2 walk).
    response: Message,
  },
  /// A client request's transaction exhausted its retransmissions.
  ClientTimeout {
    /// The id returned by [`Engine::client_get`].
    request_id: u32,
  },
  /// A client request's Block2 walk received an out-of-sequence block
  /// or exceeded its attempt ceiling.
  ClientBlockError {
    /// The id returned by [`Engine::client_get`].
    request_id: u32,
  },
  /// A resource handler returned [`HandlerOutcome::Deferred`]; an
  /// empty ACK has already gone out. Pass `continuation` to
  /// [`Engine::resume_separate`] once the real answer is ready.
  SeparateResponseStarted {
    /// The captured request metadata needed to answer later.
    continuation: SeparateResponse,
  },
}

#[derive(Debug)]
struct DedupEntry {
  endpoint: Endpoint,
  id: Id,
  response: Vec<u8>,
}

/// The core messaging engine.
#[derive(Debug)]
pub struct Engine {
  config: Config,
  transactions: TransactionTable,
  registry: Registry,
  chain: HandlerChain,
  observe: ObserveTable,
  block1: Block1Reassembler,
  client_requests: Vec<Option<ClientRequest>>,
  dedup: Vec<DedupEntry>,
  next_mid: u16,
}

impl Engine {
  /// Build an engine from `config`, with empty registry/chain/tables.
  pub fn new(config: Config) -> Self {
    Engine { transactions: TransactionTable::new(config.max_transactions),
             observe: ObserveTable::new(config.observe),
             block1: Block1Reassembler::new(config.block.max_reassembly_size),
             registry: Registry::new(),
             chain: HandlerChain::new(),
             client_requests: Vec::new(),
             dedup: Vec::new(),
             config }
  }

  /// Borrow the resource registry, to activate resources before the
  /// engine starts receiving.
  pub fn registry_mut(&mut self) -> &mut Registry {
    &mut self.registry
  }

  /// Borrow the handler chain, to install middleware before the engine
  /// starts receiving.
  pub fn chain_mut(&mut self) -> &mut HandlerChain {
    &mut self.chain
  }

  fn fresh_mid(&mut self) -> Id {
    let id = Id(self.next_mid);
    self.next_mid = self.next_mid.wrapping_add(1);
    Id(id.0)
  }

  /// Issue a client GET for `path` at `endpoint`, walking Block2 as
  /// needed. Returns an id to correlate the eventual
  /// [`EngineEvent::ClientResponse`]/`ClientTimeout`/`ClientBlockError`.
  pub fn client_get<T: Transport>(&mut self,
                                  endpoint: Endpoint,
                                  path: &str,
                                  now: Millis,
                                  transport: &mut T)
                                  -> Result<u32, Error> {
    let token = Token::opaque(format!("{endpoint}{path}{now}").as_bytes());
    let request_id = self.alloc_client_slot(ClientRequest::new(endpoint,
                                                                token.clone(),
                                                                path,
                                                                self.config.block.preferred_size,
                                                                self.config.max_block_attempts));

    let mid = self.fresh_mid();
    let mut req = Message::new(Type::Con, Code::GET, mid, token.clone());
    let _ = req.set_path(path);

    self.send_client_request(request_id, req, now, transport)?;
    Ok(request_id)
  }

  fn alloc_client_slot(&mut self, req: ClientRequest) -> u32 {
    if let Some((ix, free)) =
      self.client_requests.iter_mut().enumerate().find(|(_, s)| s.is_none())
    {
      *free = Some(req);
      ix as u32
    } else {
      self.client_requests.push(Some(req));
      (self.client_requests.len() - 1) as u32
    }
  }

  fn send_client_request<T: Transport>(&mut self,
                                        request_id: u32,
                                        req: Message,
                                        now: Millis,
                                        transport: &mut T)
                                        -> Result<(), Error> {
    let endpoint = self.client_requests[request_id as usize].as_ref()
                       .expect("send_client_request on a freed slot")
                       .endpoint();
    let bytes = req.to_bytes().map_err(|e| Error::new(When::Sending(endpoint), What::ToBytes(e)))?;

    let handle = self.transactions
                      .new_transaction(req.id,
                                       endpoint,
                                       req.token.clone(),
                                       bytes,
                                       req.ty == Type::Con,
                                       Purpose::ClientRequest(request_id),
                                       self.config.msg.con,
                                       now)
                      .ok_or_else(|| Error::new(When::Sending(endpoint), What::TransactionTableFull))?;

    self.transactions
        .send(handle, transport)
        .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))
  }

  /// Feed an inbound datagram from `endpoint` into the engine.
  ///
  /// A datagram that fails to parse never surfaces as an `Err`: an
  /// unrecognized critical option answers `4.02 Bad Option` (still
  /// piggy-backed for CON, as a fresh NON otherwise), any other
  /// format error answers a bare RST for CON and is silently dropped
  /// otherwise — both recovered from [`coap_msg::peek_header`], which
  /// salvages the type/id/token that parsing got to before failing.
  pub fn on_datagram<T: Transport>(&mut self,
                                    now: Millis,
                                    endpoint: Endpoint,
                                    bytes: &[u8],
                                    transport: &mut T)
                                    -> Result<Vec<EngineEvent>, Error> {
    let msg = match Message::from_bytes(bytes) {
      | Ok(msg) => msg,
      | Err(MessageParseError::UnknownCriticalOption(n)) => {
        log::debug!("{endpoint}: rejecting unrecognized critical option {n}");
        if let Some((ty @ (Type::Con | Type::Non), id, token)) = coap_msg::peek_header(bytes) {
          self.reply_bad_option(endpoint, ty, id, token, transport)?;
        }
        return Ok(Vec::new());
      },
      | Err(e) => {
        log::debug!("{endpoint}: dropping malformed datagram: {e}");
        if let Some((Type::Con, id, _)) = coap_msg::peek_header(bytes) {
          let rst = Message::empty(Type::Reset, id);
          let rst_bytes = rst.to_bytes().map_err(|e| Error::new(When::Sending(endpoint), What::ToBytes(e)))?;
          transport.send(endpoint, &rst_bytes)
                   .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))?;
        }
        return Ok(Vec::new());
      },
    };

    log::trace!("{}", crate::logging::msg_summary(msg.ty, msg.code, msg.id, &msg));

    match msg.code.kind() {
      | coap_msg::CodeKind::Empty => self.on_empty(now, endpoint, msg, transport),
      | coap_msg::CodeKind::Request => self.on_request(now, endpoint, msg, transport),
      | coap_msg::CodeKind::Response => self.on_response(now, endpoint, msg, transport),
    }
  }

  fn reply_bad_option<T: Transport>(&self,
                                     endpoint: Endpoint,
                                     ty: Type,
                                     id: Id,
                                     token: Token,
                                     transport: &mut T)
                                     -> Result<(), Error> {
    let mut resp = Message::empty(if ty == Type::Non { Type::Non } else { Type::Ack }, id);
    resp.token = token;
    resp.code = Code::BAD_OPTION;
    let bytes = resp.to_bytes().map_err(|e| Error::new(When::Sending(endpoint), What::ToBytes(e)))?;
    transport.send(endpoint, &bytes)
             .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))
  }

  fn on_empty<T: Transport>(&mut self,
                             now: Millis,
                             endpoint: Endpoint,
                             msg: Message,
                             transport: &mut T)
                             -> Result<Vec<EngineEvent>, Error> {
    match msg.ty {
      | Type::Con => {
        // An empty CON is a CoAP ping; answer with RST.
        let rst = Message::empty(Type::Reset, msg.id);
        let bytes = rst.to_bytes().map_err(|e| Error::new(When::Sending(endpoint), What::ToBytes(e)))?;
        transport.send(endpoint, &bytes)
                 .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))?;
        Ok(Vec::new())
      },
      | Type::Ack | Type::Reset => {
        let mut events = Vec::new();
        if let Some(handle) = self.transactions.find_by_mid(msg.id, endpoint) {
          if let Some(purpose) = self.transactions.complete(handle) {
            match (purpose, msg.ty) {
              | (Purpose::ObserveNotification(oid), Type::Ack) => {
                self.observe.ack_received(ObserverId(oid as usize));
              },
              | (Purpose::ObserveNotification(_), Type::Reset) => {
                self.observe.remove_by_client(endpoint);
              },
              | (Purpose::ClientRequest(id), Type::Reset) => {
                if let Some(Some(req)) = self.client_requests.get_mut(id as usize) {
                  req.on_timeout();
                  events.push(EngineEvent::ClientTimeout { request_id: id });
                }
              },
              // An empty ACK to a client request means a separate
              // response is coming later; nothing to do yet.
              | (Purpose::ClientRequest(_), Type::Ack) => {},
              | _ => {},
            }
          }
        }
        Ok(events)
      },
      | Type::Non => Ok(Vec::new()),
    }
  }

  fn on_request<T: Transport>(&mut self,
                               now: Millis,
                               endpoint: Endpoint,
                               req: Message,
                               transport: &mut T)
                               -> Result<Vec<EngineEvent>, Error> {
    if let Some(cached) = self.dedup
                               .iter()
                               .find(|e| e.endpoint == endpoint && e.id == req.id)
    {
      transport.send(endpoint, &cached.response)
               .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))?;
      return Ok(Vec::new());
    }

    let mut resp = Message::empty(Type::Ack, req.id);
    resp.token = req.token.clone();

    if self.chain.run(&req, &mut resp) {
      self.finish_piggybacked(endpoint, &req, resp, transport)?;
      return Ok(Vec::new());
    }

    let mut full_req = req.clone();

    if let Some(block1) = req.block1() {
      match self.block1.accept(endpoint, req.token.clone(), block1, req.get_payload()) {
        | Block1Outcome::Continue => {
          resp.code = Code::CONTINUE;
          resp.set_block1(block1);
          self.finish_piggybacked(endpoint, &req, resp, transport)?;
          return Ok(Vec::new());
        },
        | Block1Outcome::TooLarge => {
          resp.code = Code::REQUEST_ENTITY_TOO_LARGE;
          self.finish_piggybacked(endpoint, &req, resp, transport)?;
          return Ok(Vec::new());
        },
        | Block1Outcome::OutOfOrder => {
          resp.code = Code::REQUEST_ENTITY_INCOMPLETE;
          self.finish_piggybacked(endpoint, &req, resp, transport)?;
          return Ok(Vec::new());
        },
        | Block1Outcome::Complete(body) => full_req.set_payload(body),
      }
    }

    let Ok(path) = req.path() else {
      resp.code = Code::BAD_OPTION;
      self.finish_piggybacked(endpoint, &req, resp, transport)?;
      return Ok(Vec::new());
    };

    // Only a GET may open or close an Observe relationship; nothing in
    // the protocol gives POST/PUT/DELETE an Observe meaning.
    let observe_action = (req.code == Code::GET).then(|| req.observe())
                                                 .flatten()
                                                 .and_then(coap_msg::ObserveAction::from_value);

    let Some(resource) = self.registry.find_mut(&path) else {
      resp.code = Code::NOT_FOUND;
      self.finish_piggybacked(endpoint, &req, resp, transport)?;
      return Ok(Vec::new());
    };

    let method = crate::resource::MethodSet::of_code(req.code);
    let allowed = method.map(|m| resource.methods.contains(m)).unwrap_or(false);
    if !allowed {
      resp.code = Code::METHOD_NOT_ALLOWED;
      self.finish_piggybacked(endpoint, &req, resp, transport)?;
      return Ok(Vec::new());
    }

    let is_observable = resource.flags.contains(crate::resource::ResourceFlags::IS_OBSERVABLE);
    let outcome = resource.handle(&full_req, &mut resp);

    if is_observable {
      match observe_action {
        | Some(coap_msg::ObserveAction::Register) => {
          if let Some(id) = self.observe.register(&path, endpoint, req.token.clone()) {
            resp.set_observe(0);
            let _ = id;
          }
        },
        | Some(coap_msg::ObserveAction::Deregister) => {
          self.observe.remove_by_token(endpoint, &req.token);
        },
        | None => {},
      }
    }

    Self::slice_block2(req.block2(), self.config.block.preferred_size, &mut resp);

    match outcome {
      | HandlerOutcome::Responded => {
        self.finish_piggybacked(endpoint, &req, resp, transport)?;
        Ok(Vec::new())
      },
      | HandlerOutcome::Deferred => {
        resp.code = Code::EMPTY;
        let bytes = resp.to_bytes().map_err(|e| Error::new(When::Sending(endpoint), What::ToBytes(e)))?;
        transport.send(endpoint, &bytes)
                 .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))?;
        self.cache_dedup(endpoint, req.ty, req.id, &bytes);
        log::debug!("{endpoint}: deferring response to /{path}, sent empty ACK mid={}", req.id.0);
        let continuation = SeparateResponse::capture(&req, endpoint);
        Ok(vec![EngineEvent::SeparateResponseStarted { continuation }])
      },
    }
  }

  /// Remember `bytes` as the answer to `(endpoint, id)` if it came from a
  /// CON request, so a retransmission of the same request is answered
  /// from cache rather than dispatched to the handler a second time.
  fn cache_dedup(&mut self, endpoint: Endpoint, ty: Type, id: Id, bytes: &[u8]) {
    if ty != Type::Con {
      return;
    }
    const DEDUP_CAP: usize = 16;
    if self.dedup.len() >= DEDUP_CAP {
      self.dedup.remove(0);
    }
    self.dedup.push(DedupEntry { endpoint, id, response: bytes.to_vec() });
  }

  /// Slice an oversized (or explicitly block-requested) response body
  /// into one Block2 chunk. Shared between the normal request path and
  /// [`Engine::resume_separate`], since a separate response negotiates
  /// Block2 exactly as a piggy-backed one would.
  fn slice_block2(requested: Option<Block>, default_size: u16, resp: &mut Message) {
    let body = resp.get_payload().to_vec();
    if body.is_empty() {
      return;
    }

    let size = requested.map(|b| b.size()).unwrap_or(default_size);
    let num = requested.map(|b| b.num()).unwrap_or(0);

    if requested.is_some() || body.len() > size as usize {
      let (chunk, more) = crate::block::slice(&body, num, size);
      if let Some(block) = Block::new(num, more, size) {
        resp.set_block2(block);
        resp.set_payload(chunk.to_vec());
      }
    }
  }

  /// Send the real answer to a request that was previously deferred
  /// (see [`EngineEvent::SeparateResponseStarted`]), as a fresh
  /// Confirmable message carrying the original token. Slices `payload`
  /// into a Block2 chunk if the original request negotiated one or the
  /// body is larger than the configured preferred size.
  pub fn resume_separate<T: Transport>(&mut self,
                                        continuation: &SeparateResponse,
                                        code: Code,
                                        payload: Vec<u8>,
                                        now: Millis,
                                        transport: &mut T)
                                        -> Result<(), Error> {
    let endpoint = continuation.endpoint();
    let mid = self.fresh_mid();
    let mut resp = continuation.resume(mid, code, payload);
    Self::slice_block2(continuation.requested_block2(), self.config.block.preferred_size, &mut resp);

    let bytes = resp.to_bytes().map_err(|e| Error::new(When::Sending(endpoint), What::ToBytes(e)))?;

    let handle = self.transactions
                      .new_transaction(mid,
                                        endpoint,
                                        resp.token.clone(),
                                        bytes,
                                        true,
                                        Purpose::SeparateResponse,
                                        self.config.msg.con,
                                        now)
                      .ok_or_else(|| Error::new(When::Sending(endpoint), What::TransactionTableFull))?;

    self.transactions
        .send(handle, transport)
        .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))
  }

  fn finish_piggybacked<T: Transport>(&mut self,
                                       endpoint: Endpoint,
                                       req: &Message,
                                       mut resp: Message,
                                       transport: &mut T)
                                       -> Result<(), Error> {
    if req.ty == Type::Non {
      resp.ty = Type::Non;
      resp.id = self.fresh_mid();
    } else {
      resp.ty = Type::Ack;
      resp.id = req.id;
    }

    let bytes = resp.to_bytes().map_err(|e| Error::new(When::Sending(endpoint), What::ToBytes(e)))?;

    self.cache_dedup(endpoint, req.ty, req.id, &bytes);

    transport.send(endpoint, &bytes)
             .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))
  }

  fn on_response<T: Transport>(&mut self,
                                now: Millis,
                                endpoint: Endpoint,
                                resp: Message,
                                transport: &mut T)
                                -> Result<Vec<EngineEvent>, Error> {
    let mut events = Vec::new();

    let Some(handle) = self.transactions.find_by_mid(resp.id, endpoint) else {
      return Ok(events);
    };
    let Some(Purpose::ClientRequest(request_id)) = self.transactions.complete(handle) else {
      return Ok(events);
    };

    if resp.ty == Type::Con {
      let ack = Message::empty(Type::Ack, resp.id);
      let bytes = ack.to_bytes().map_err(|e| Error::new(When::Sending(endpoint), What::ToBytes(e)))?;
      transport.send(endpoint, &bytes)
               .map_err(|_| Error::new(When::Sending(endpoint), What::TransportError))?;
    }

    let Some(Some(client)) = self.client_requests.get_mut(request_id as usize) else {
      return Ok(events);
    };

    match client.on_response(&resp).clone() {
      | ClientStatus::More => {
        let mid = self.fresh_mid();
        if let Some(Some(client)) = self.client_requests.get(request_id as usize) {
          if let Some(next) = client.next_block_request(mid) {
            self.send_client_request(request_id, next, now, transport)?;
          }
        }
      },
      | ClientStatus::Response(_) => {
        if let Some(Some(client)) = self.client_requests.get_mut(request_id as usize) {
          if let Some(final_resp) = client.take_response() {
            events.push(EngineEvent::ClientResponse { request_id, response: final_resp });
          }
        }
      },
      | ClientStatus::BlockError => {
        events.push(EngineEvent::ClientBlockError { request_id });
      },
      | ClientStatus::Timeout | ClientStatus::Finished => {},
    }

    Ok(events)
  }

  /// Service due retry timers, periodic resource hooks, and the Observe
  /// drain queue. Call frequently (on the order of the drain delays in
  /// [`crate::config::Observe`], 1-10ms).
  pub fn advance<T: Transport>(&mut self, now: Millis, transport: &mut T) -> Vec<EngineEvent> {
    let mut out = Vec::new();

    let due: Vec<String> = self.registry
                                .iter_mut()
                                .filter(|r| r.fire_periodic_if_due(now))
                                .map(|r| r.path.clone())
                                .collect();
    for path in due {
      self.notify(&path, now);
    }

    for ev in self.transactions.advance(now, transport) {
      if let TxEvent::Exhausted(_, purpose) = ev {
        match purpose {
          | Purpose::ClientRequest(id) => {
            if let Some(Some(req)) = self.client_requests.get_mut(id as usize) {
              req.on_timeout();
              out.push(EngineEvent::ClientTimeout { request_id: id });
            }
          },
          | Purpose::ObserveNotification(oid) => {
            let observer = ObserverId(oid as usize);
            if let Some((endpoint, _)) = self.observe.endpoint_and_token(observer) {
              self.observe.remove_by_client(endpoint);
            }
          },
          | Purpose::SeparateResponse => {
            log::debug!("separate response exhausted retransmissions without an ACK");
          },
        }
      }
    }

    if let Some(notif) = self.observe.drain_tick(now) {
      if let Some((endpoint, token)) = self.observe.endpoint_and_token(notif.observer) {
        if let Some(uri) = self.observe.uri(notif.observer).map(|s| s.to_string()) {
          let synthetic = {
            let mut r = Message::new(Type::Con, Code::GET, Id(0), token.clone());
            let _ = r.set_path(&uri);
            r
          };

          let resp_ty = if notif.confirmable { Type::Con } else { Type::Non };
          let mid = self.fresh_mid();
          let mut resp = Message::empty(resp_ty, mid);
          resp.token = token.clone();

          if let Some(resource) = self.registry.find_mut(&uri) {
            resource.handle(&synthetic, &mut resp);
          }
          resp.code = Code::CONTENT;
          resp.set_observe(notif.seq);

          if let Ok(bytes) = resp.to_bytes() {
            if notif.confirmable {
              if let Some(handle) = self.transactions.new_transaction(mid,
                                                                       endpoint,
                                                                       token,
                                                                       bytes,
                                                                       true,
                                                                       Purpose::ObserveNotification(notif.observer.0 as u32),
                                                                       self.config.msg.con,
                                                                       now)
              {
                let _ = self.transactions.send(handle, transport);
                self.observe.mark_awaiting_ack(notif.observer, mid);
              }
            } else {
              let _ = transport.send(endpoint, &bytes);
            }
          }
        }
      }
    }

    out
  }

  /// A value at `uri` changed; queue a notification for every observer
  /// within that resource's notification scope (its own uri, plus any
  /// sub-paths if it has [`crate::resource::ResourceFlags::HAS_SUB_RESOURCES`] set).
  pub fn notify(&mut self, uri: &str, now: Millis) {
    let Some(resource) = self.registry.find(uri) else { return };

    let matching: Vec<ObserverId> = self.observe
                                         .ids()
                                         .filter(|&id| {
                                           self.observe
                                               .uri(id)
                                               .map(|observer_uri| resource.matches_notify_scope(observer_uri))
                                               .unwrap_or(false)
                                         })
                                         .collect();

    self.observe.notify(matching, now);
  }
}

#[cfg(test)]
mod tests {
  use coap_msg::ContentFormat;

  use super::*;
  use crate::endpoint::IpAddr;
  use crate::resource::{MethodSet, Resource};

  #[derive(Default)]
  struct FakeTransport {
    sent: Vec<(Endpoint, Vec<u8>)>,
  }

  impl Transport for FakeTransport {
    type Error = core::convert::Infallible;

    fn send(&mut self, endpoint: Endpoint, bytes: &[u8]) -> Result<(), Self::Error> {
      self.sent.push((endpoint, bytes.to_vec()));
      Ok(())
    }
  }

  impl FakeTransport {
    fn last(&self) -> Message {
      Message::from_bytes(&self.sent.last().expect("nothing sent").1).unwrap()
    }
  }

  fn ep() -> Endpoint {
    Endpoint::new(IpAddr::V4([127, 0, 0, 1]), 5683)
  }

  fn engine_with_hello() -> Engine {
    let mut engine = Engine::new(Config::default());
    engine.registry_mut().activate(Resource::new("hello", MethodSet::GET, |_: &Message, resp: &mut Message| {
                            resp.code = Code::CONTENT;
                            resp.set_payload(b"world".to_vec());
                            HandlerOutcome::Responded
                          }));
    engine
  }

  #[test]
  fn piggybacked_get_answers_in_the_ack() {
    let mut engine = engine_with_hello();
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(1), Token::new(vec![1]).unwrap());
    req.set_path("hello").unwrap();
    let bytes = req.to_bytes().unwrap();

    let events = engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    assert!(events.is_empty());

    let resp = transport.last();
    assert_eq!(resp.ty, Type::Ack);
    assert_eq!(resp.id, Id(1));
    assert_eq!(resp.code, Code::CONTENT);
    assert_eq!(resp.get_payload(), b"world");
  }

  #[test]
  fn retransmitted_con_request_is_deduplicated() {
    let mut engine = engine_with_hello();
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(7), Token::new(vec![2]).unwrap());
    req.set_path("hello").unwrap();
    let bytes = req.to_bytes().unwrap();

    engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    engine.on_datagram(100, ep(), &bytes, &mut transport).unwrap();

    assert_eq!(transport.sent.len(), 2);
    assert_eq!(transport.sent[0].1, transport.sent[1].1);
  }

  #[test]
  fn unknown_method_is_method_not_allowed() {
    let mut engine = engine_with_hello();
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::POST, Id(1), Token::EMPTY);
    req.set_path("hello").unwrap();
    let bytes = req.to_bytes().unwrap();

    engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    assert_eq!(transport.last().code, Code::METHOD_NOT_ALLOWED);
  }

  #[test]
  fn missing_resource_is_not_found() {
    let mut engine = engine_with_hello();
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(1), Token::EMPTY);
    req.set_path("nope").unwrap();
    let bytes = req.to_bytes().unwrap();

    engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    assert_eq!(transport.last().code, Code::NOT_FOUND);
  }

  #[test]
  fn malformed_datagram_answers_reset_for_con() {
    let mut engine = engine_with_hello();
    let mut transport = FakeTransport::default();

    // tkl nibble claims 9, which is reserved and fails even header/token
    // recovery, so no RST can be built — nothing should be sent.
    let bytes = vec![(1u8 << 6) | 9, 1, 0, 5];
    let events = engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    assert!(events.is_empty());
    assert!(transport.sent.is_empty());
  }

  #[test]
  fn unknown_critical_option_answers_bad_option() {
    let mut engine = engine_with_hello();
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(9), Token::new(vec![3]).unwrap());
    req.opts.insert(19, vec![vec![1]]);
    let bytes = req.to_bytes().unwrap();

    engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    let resp = transport.last();
    assert_eq!(resp.ty, Type::Ack);
    assert_eq!(resp.id, Id(9));
    assert_eq!(resp.code, Code::BAD_OPTION);
  }

  #[test]
  fn non_get_with_observe_zero_does_not_register() {
    let mut engine = Engine::new(Config::default());
    engine.registry_mut().activate(Resource::new("sensors/temp",
                                                  MethodSet::GET | MethodSet::PUT,
                                                  |_: &Message, resp: &mut Message| {
                                                    resp.code = Code::CHANGED;
                                                    HandlerOutcome::Responded
                                                  })
                                                        .observable());
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::PUT, Id(1), Token::new(vec![4]).unwrap());
    req.set_path("sensors/temp").unwrap();
    req.set_observe(0);
    let bytes = req.to_bytes().unwrap();

    engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    assert!(transport.last().observe().is_none());

    // no observer was registered, so a notify has nothing to deliver
    engine.notify("sensors/temp", 10);
    assert!(engine.advance(1000, &mut transport).is_empty());
  }

  #[test]
  fn observe_register_then_notify_delivers_a_con_notification() {
    let mut engine = Engine::new(Config::default());
    engine.registry_mut().activate(Resource::new("sensors/temp",
                                                  MethodSet::GET,
                                                  |_: &Message, resp: &mut Message| {
                                                    resp.code = Code::CONTENT;
                                                    resp.set_payload(b"21".to_vec());
                                                    HandlerOutcome::Responded
                                                  })
                                                        .observable());
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(1), Token::new(vec![5]).unwrap());
    req.set_path("sensors/temp").unwrap();
    req.set_observe(0);
    let bytes = req.to_bytes().unwrap();

    engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    let registered = transport.last();
    assert_eq!(registered.observe(), Some(0));

    engine.notify("sensors/temp", 10);
    // first notification after registration drains as NON (seq 1, not a
    // multiple of the refresh interval)
    let events = engine.advance(20, &mut transport);
    assert!(events.is_empty());
    let notif = transport.last();
    assert_eq!(notif.ty, Type::Non);
    assert_eq!(notif.observe(), Some(1));
    assert_eq!(notif.get_payload(), b"21");
  }

  #[test]
  fn block2_walk_slices_an_oversized_response() {
    let mut engine = Engine::new(Config::default());
    let body = vec![b'x'; 200];
    let body_for_handler = body.clone();
    engine.registry_mut().activate(Resource::new("big", MethodSet::GET, move |_: &Message, resp: &mut Message| {
                            resp.code = Code::CONTENT;
                            resp.set_payload(body_for_handler.clone());
                            HandlerOutcome::Responded
                          }));
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(1), Token::new(vec![6]).unwrap());
    req.set_path("big").unwrap();
    let bytes = req.to_bytes().unwrap();

    engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    let resp = transport.last();
    let block2 = resp.block2().expect("response should be sliced");
    assert_eq!(block2.num(), 0);
    assert!(block2.more());
    assert_eq!(resp.get_payload().len(), 64);
    assert_eq!(resp.get_payload(), &body[..64]);
  }

  #[test]
  fn block1_put_reassembles_across_chunks() {
    let mut engine = Engine::new(Config::default());
    engine.registry_mut()
          .activate(Resource::new("upload", MethodSet::PUT, |req: &Message, resp: &mut Message| {
            assert_eq!(req.get_payload(), b"helloworld");
            resp.code = Code::CHANGED;
            HandlerOutcome::Responded
          }));
    let mut transport = FakeTransport::default();

    let mut first = Message::new(Type::Con, Code::PUT, Id(1), Token::new(vec![7]).unwrap());
    first.set_path("upload").unwrap();
    first.set_block1(Block::new(0, true, 16).unwrap());
    first.set_payload(b"hello".to_vec());
    engine.on_datagram(0, ep(), &first.to_bytes().unwrap(), &mut transport).unwrap();
    assert_eq!(transport.last().code, Code::CONTINUE);

    let mut second = Message::new(Type::Con, Code::PUT, Id(2), Token::new(vec![7]).unwrap());
    second.set_path("upload").unwrap();
    second.set_block1(Block::new(1, false, 16).unwrap());
    second.set_payload(b"world".to_vec());
    engine.on_datagram(10, ep(), &second.to_bytes().unwrap(), &mut transport).unwrap();
    assert_eq!(transport.last().code, Code::CHANGED);
  }

  #[test]
  fn deferred_response_is_resumed_as_a_fresh_con() {
    let mut engine = Engine::new(Config::default());
    engine.registry_mut().activate(Resource::new("slow", MethodSet::GET, |_: &Message, _: &mut Message| {
                            HandlerOutcome::Deferred
                          }));
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(1), Token::new(vec![8]).unwrap());
    req.set_path("slow").unwrap();
    let bytes = req.to_bytes().unwrap();

    let events = engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    let ack = transport.last();
    assert_eq!(ack.ty, Type::Ack);
    assert_eq!(ack.code, Code::EMPTY);

    let continuation = match events.as_slice() {
      | [EngineEvent::SeparateResponseStarted { continuation }] => continuation.clone(),
      | _ => panic!("expected a SeparateResponseStarted event"),
    };

    engine.resume_separate(&continuation, Code::CONTENT, b"done".to_vec(), 5, &mut transport).unwrap();
    let separate = transport.last();
    assert_eq!(separate.ty, Type::Con);
    assert_eq!(separate.token, Token::new(vec![8]).unwrap());
    assert_eq!(separate.code, Code::CONTENT);
    assert_eq!(separate.get_payload(), b"done");
  }

  #[test]
  fn retransmitted_deferred_request_does_not_redispatch() {
    use std::cell::Cell;
    use std::rc::Rc;

    let dispatches = Rc::new(Cell::new(0));
    let counted = Rc::clone(&dispatches);
    let mut engine = Engine::new(Config::default());
    engine.registry_mut().activate(Resource::new("slow", MethodSet::GET, move |_: &Message, _: &mut Message| {
                            counted.set(counted.get() + 1);
                            HandlerOutcome::Deferred
                          }));
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(1), Token::new(vec![9]).unwrap());
    req.set_path("slow").unwrap();
    let bytes = req.to_bytes().unwrap();

    let first = engine.on_datagram(0, ep(), &bytes, &mut transport).unwrap();
    assert_eq!(first.len(), 1);
    let second = engine.on_datagram(50, ep(), &bytes, &mut transport).unwrap();

    assert!(second.is_empty());
    assert_eq!(dispatches.get(), 1);
    assert_eq!(transport.sent.len(), 2);
    assert_eq!(transport.sent[0].1, transport.sent[1].1);
  }

  #[test]
  fn client_get_times_out_after_exhausting_retries() {
    let mut engine = Engine::new(Config { msg: crate::config::Msg { token_seed: 0,
                                                                     con: crate::config::Con {
                                                                       retry_strategy:
                                                                         crate::retry::Strategy::Delay { min: 10,
                                                                                                          max: 10 },
                                                                       max_attempts: crate::retry::Attempts(0) } },
                                          ..Config::default() });
    let mut transport = FakeTransport::default();

    let request_id = engine.client_get(ep(), "hello", 0, &mut transport).unwrap();
    assert_eq!(transport.sent.len(), 1);

    let events = engine.advance(10, &mut transport);
    assert!(matches!(events.as_slice(), [EngineEvent::ClientTimeout { request_id: id }] if *id == request_id));
    assert_eq!(transport.sent.len(), 1, "zero retransmissions allowed means no resend before giving up");
  }

  #[test]
  fn empty_con_ping_is_answered_with_reset() {
    let mut engine = engine_with_hello();
    let mut transport = FakeTransport::default();

    let ping = Message::empty(Type::Con, Id(3));
    engine.on_datagram(0, ep(), &ping.to_bytes().unwrap(), &mut transport).unwrap();
    assert_eq!(transport.last().ty, Type::Reset);
  }

  #[test]
  fn content_format_round_trips_through_a_handler() {
    let mut engine = Engine::new(Config::default());
    engine.registry_mut().activate(Resource::new("fmt", MethodSet::GET, |_: &Message, resp: &mut Message| {
                            resp.code = Code::CONTENT;
                            resp.set_content_format(ContentFormat::Json);
                            resp.set_payload(b"{}".to_vec());
                            HandlerOutcome::Responded
                          }));
    let mut transport = FakeTransport::default();

    let mut req = Message::new(Type::Con, Code::GET, Id(1), Token::EMPTY);
    req.set_path("fmt").unwrap();
    engine.on_datagram(0, ep(), &req.to_bytes().unwrap(), &mut transport).unwrap();

    assert_eq!(transport.last().content_format(), Some(ContentFormat::Json));
  }

  #[test]
  fn periodic_hook_fires_on_advance_and_notifies_observers() {
    let mut engine = Engine::new(Config::default());
    engine.registry_mut().activate(Resource::new("temp", MethodSet::GET, |_: &Message, resp: &mut Message| {
                            resp.code = Code::CONTENT;
                            resp.set_payload(b"22".to_vec());
                            HandlerOutcome::Responded
                          }).observable()
                                .periodic(100, 0, || true));
    let mut transport = FakeTransport::default();

    let mut sub = Message::new(Type::Con, Code::GET, Id(1), Token::new(vec![1]).unwrap());
    sub.set_path("temp").unwrap();
    sub.set_observe(0);
    engine.on_datagram(0, ep(), &sub.to_bytes().unwrap(), &mut transport).unwrap();
    assert_eq!(transport.last().observe(), Some(0));

    // not yet due
    assert!(transport.sent.len() == 1);
    engine.advance(50, &mut transport);
    assert_eq!(transport.sent.len(), 1);

    // due now: fires, queues a notification, drained on the next tick
    engine.advance(100, &mut transport);
    let after_fire = engine.advance(110, &mut transport);
    assert!(after_fire.is_empty());
    let notif = transport.last();
    assert_eq!(notif.observe(), Some(1));
    assert_eq!(notif.get_payload(), b"22");
  }
}
