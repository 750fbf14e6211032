//! Resource registry and request dispatch.
//!
//! Resources own a `Box<dyn Handler>` for dynamic dispatch, and the
//! registry is a flat, insertion-ordered `Vec<Resource>` rather than a
//! linked list threaded through static memory.

use core::fmt;

use coap_msg::{Code, Message};

use crate::time::Millis;

/// The methods a resource accepts, as a bitmask over the four methods
/// this core recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodSet(u8);

impl MethodSet {
  /// No methods accepted.
  pub const NONE: Self = Self(0);
  /// `GET`.
  pub const GET: Self = Self(1 << 0);
  /// `POST`.
  pub const POST: Self = Self(1 << 1);
  /// `PUT`.
  pub const PUT: Self = Self(1 << 2);
  /// `DELETE`.
  pub const DELETE: Self = Self(1 << 3);

  /// Union two method sets.
  pub const fn or(self, other: Self) -> Self {
    Self(self.0 | other.0)
  }

  /// Does this set include `method`?
  pub fn contains(&self, method: Self) -> bool {
    self.0 & method.0 != 0
  }

  /// The method set corresponding to a request [`Code`], if it is one
  /// of the four this core recognizes.
  pub fn of_code(code: Code) -> Option<Self> {
    match code {
      | Code::GET => Some(Self::GET),
      | Code::POST => Some(Self::POST),
      | Code::PUT => Some(Self::PUT),
      | Code::DELETE => Some(Self::DELETE),
      | _ => None,
    }
  }
}

impl core::ops::BitOr for MethodSet {
  type Output = MethodSet;

  fn bitor(self, rhs: MethodSet) -> MethodSet {
    self.or(rhs)
  }
}

/// Resource capability flags:
/// `{HAS_SUB_RESOURCES, IS_OBSERVABLE, IS_SEPARATE, IS_PERIODIC}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceFlags(u8);

impl ResourceFlags {
  /// No flags set.
  pub const NONE: Self = Self(0);
  /// Observers registered on a strict sub-path of this resource's URI
  /// (separated by `/`) also match this resource's notifications.
  pub const HAS_SUB_RESOURCES: Self = Self(1 << 0);
  /// GET with `Observe=0` on this resource registers an observer.
  pub const IS_OBSERVABLE: Self = Self(1 << 1);
  /// This resource answers with a separate response rather than
  /// piggy-backing on the request's ACK.
  pub const IS_SEPARATE: Self = Self(1 << 2);
  /// This resource has a periodic hook armed on registration.
  pub const IS_PERIODIC: Self = Self(1 << 3);

  /// Does this set include `flag`?
  pub fn contains(&self, flag: Self) -> bool {
    self.0 & flag.0 != 0
  }
}

impl core::ops::BitOr for ResourceFlags {
  type Output = ResourceFlags;

  fn bitor(self, rhs: ResourceFlags) -> ResourceFlags {
    ResourceFlags(self.0 | rhs.0)
  }
}

impl core::ops::BitOrAssign for ResourceFlags {
  fn bitor_assign(&mut self, rhs: ResourceFlags) {
    self.0 |= rhs.0;
  }
}

/// What a [`Handler`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
  /// `resp` has been filled in; send it as the final response
  /// (piggy-backed in the request's ACK, or as the separate-response
  /// follow-up).
  Responded,
  /// The handler will supply the real response later, via
  /// [`crate::separate::SeparateResponse::resume`]; the engine should
  /// send an empty ACK now.
  Deferred,
}

/// Per-method request handling for one [`Resource`].
///
/// A trait object gives each resource its own dynamic dispatch without
/// needing a sum type over every handler shape.
pub trait Handler {
  /// Handle `req`, filling in `resp`'s code/options/payload.
  fn handle(&mut self, req: &Message, resp: &mut Message) -> HandlerOutcome;
}

impl<F: FnMut(&Message, &mut Message) -> HandlerOutcome> Handler for F {
  fn handle(&mut self, req: &Message, resp: &mut Message) -> HandlerOutcome {
    self(req, resp)
  }
}

/// A periodic resource's fire hook: runs on every `period_ms` expiry,
/// updating whatever state backs the resource's representation, and
/// reports whether it changed (and so an Observe notification is due).
pub trait PeriodicHandler {
  /// Refresh the resource's representation. Returns `true` if it
  /// changed, telling the engine to call [`crate::engine::Engine::notify`]
  /// for this resource.
  fn on_fire(&mut self) -> bool;
}

impl<F: FnMut() -> bool> PeriodicHandler for F {
  fn on_fire(&mut self) -> bool {
    self()
  }
}

/// A periodic hook: re-fires every `period_ms`, driving observe
/// notifications for resources that change on a schedule rather than
/// on an external trigger.
pub struct Periodic {
  /// How often the hook fires.
  pub period_ms: Millis,
  pub(crate) next_due: Millis,
  handler: Box<dyn PeriodicHandler>,
}

impl Periodic {
  /// Arm a periodic hook starting `period_ms` from `now`, firing
  /// `handler` on each expiry.
  pub fn new(period_ms: Millis, now: Millis, handler: impl PeriodicHandler + 'static) -> Self {
    Periodic { period_ms, next_due: now.saturating_add(period_ms), handler: Box::new(handler) }
  }
}

impl fmt::Debug for Periodic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Periodic")
     .field("period_ms", &self.period_ms)
     .field("next_due", &self.next_due)
     .field("handler", &"<dyn PeriodicHandler>")
     .finish()
  }
}

/// An activated resource: URI path, accepted methods, capability flags,
/// and the handler invoked for a matching request.
pub struct Resource {
  /// The URI path this resource was activated under, without a leading
  /// slash (e.g. `"sensors/temp"`).
  pub path: String,
  /// Methods this resource's handler accepts; others get
  /// `4.05 Method Not Allowed`.
  pub methods: MethodSet,
  /// Capability flags.
  pub flags: ResourceFlags,
  /// The `.well-known/core` attribute string (e.g. `"if=sensor"`), or
  /// empty if none.
  pub attributes: String,
  /// Periodic hook, present iff [`ResourceFlags::IS_PERIODIC`] is set.
  pub periodic: Option<Periodic>,
  handler: Box<dyn Handler>,
}

impl Resource {
  /// Activate a resource at `path`, accepting `methods`, dispatching to
  /// `handler`.
  pub fn new(path: impl Into<String>, methods: MethodSet, handler: impl Handler + 'static) -> Self {
    Resource { path: path.into(),
               methods,
               flags: ResourceFlags::default(),
               attributes: String::new(),
               periodic: None,
               handler: Box::new(handler) }
  }

  /// Builder-style: mark this resource observable.
  pub fn observable(mut self) -> Self {
    self.flags |= ResourceFlags::IS_OBSERVABLE;
    self
  }

  /// Builder-style: mark this resource as having sub-resources for
  /// Observe matching purposes.
  pub fn with_sub_resources(mut self) -> Self {
    self.flags |= ResourceFlags::HAS_SUB_RESOURCES;
    self
  }

  /// Builder-style: mark this resource as answering with separate
  /// responses.
  pub fn separate(mut self) -> Self {
    self.flags |= ResourceFlags::IS_SEPARATE;
    self
  }

  /// Builder-style: arm a periodic hook, firing `handler` every
  /// `period_ms` starting from `now`.
  pub fn periodic(mut self, period_ms: Millis, now: Millis, handler: impl PeriodicHandler + 'static) -> Self {
    self.flags |= ResourceFlags::IS_PERIODIC;
    self.periodic = Some(Periodic::new(period_ms, now, handler));
    self
  }

  /// Dispatch `req` to this resource's handler.
  pub fn handle(&mut self, req: &Message, resp: &mut Message) -> HandlerOutcome {
    self.handler.handle(req, resp)
  }

  /// If this resource's [`Periodic`] hook is due at `now`, fire it and
  /// rearm for the next period. Returns `true` if the hook changed the
  /// resource's representation and the caller should follow up with a
  /// notification.
  pub(crate) fn fire_periodic_if_due(&mut self, now: Millis) -> bool {
    let Some(periodic) = self.periodic.as_mut() else { return false };
    if now < periodic.next_due {
      return false;
    }

    periodic.next_due = now.saturating_add(periodic.period_ms);
    periodic.handler.on_fire()
  }

  /// Does `uri` match this resource's notification scope: either equal
  /// to its path, or (when [`ResourceFlags::HAS_SUB_RESOURCES`] is set)
  /// a `/`-delimited extension of it?
  pub fn matches_notify_scope(&self, uri: &str) -> bool {
    uri == self.path
    || (self.flags.contains(ResourceFlags::HAS_SUB_RESOURCES)
        && uri.strip_prefix(&self.path).map(|rest| rest.starts_with('/')).unwrap_or(false))
  }
}

impl fmt::Debug for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Resource")
     .field("path", &self.path)
     .field("methods", &self.methods)
     .field("flags", &self.flags)
     .field("attributes", &self.attributes)
     .field("periodic", &self.periodic)
     .field("handler", &"<dyn Handler>")
     .finish()
  }
}

/// Ordered set of activated resources, consulted by URI path after the
/// [`crate::handler_chain::HandlerChain`] has had first refusal.
#[derive(Default)]
pub struct Registry {
  resources: Vec<Resource>,
}

impl fmt::Debug for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registry").field("resources", &self.resources).finish()
  }
}

impl Registry {
  /// An empty registry.
  pub fn new() -> Self {
    Registry::default()
  }

  /// Activate a resource. Ownership belongs to the registry from this
  /// point on.
  pub fn activate(&mut self, resource: Resource) {
    self.resources.push(resource);
  }

  /// Look up a resource by its exact URI path.
  pub fn find(&self, path: &str) -> Option<&Resource> {
    self.resources.iter().find(|r| r.path == path)
  }

  /// Mutably look up a resource by its exact URI path.
  pub fn find_mut(&mut self, path: &str) -> Option<&mut Resource> {
    self.resources.iter_mut().find(|r| r.path == path)
  }

  /// Iterate resources in activation order (the order `.well-known/core`
  /// would enumerate them).
  pub fn iter(&self) -> impl Iterator<Item = &Resource> {
    self.resources.iter()
  }

  /// Iterate resources mutably, e.g. to service periodic hooks.
  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
    self.resources.iter_mut()
  }
}
