//! In-memory transport for workspace tests.
//!
//! [`LoopbackBus`] implements [`BusTransport`] without a daemon: it records
//! registrations, owned names, watches, signals, and replies, and lets a test
//! play the far side of the bus by granting or revoking names, vanishing
//! peers, and injecting method calls. Call routing follows the real daemon's
//! behaviour: an exact object match wins, otherwise the longest subtree
//! prefix takes the call, with unenumerated child nodes admitted only when
//! the registration's flags say so.
//!
//! Every vtable and handler invocation happens outside the internal lock;
//! handlers are expected to re-enter the bus to reply.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crossbar_schema::InterfaceSchema;

use crate::handle::{ConnectionId, MessageToken, OwnerToken, RegistrationId, WatchToken};
use crate::name::{BusName, ObjectPath};
use crate::transport::{
    BusError, BusTransport, ErrorEntry, MethodCall, NameOwnerFlags, NameOwnerHandler,
    NameWatchHandler, ObjectVtable, SubtreeFlags, SubtreeVtable, WireError,
};

const LOOPBACK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::loopback");

/// A recorded reply payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Successful reply carrying a value.
    Value(serde_json::Value),
    /// Error reply.
    Error(WireError),
}

/// One reply observed by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRecord {
    /// Token of the invocation being answered.
    pub message: MessageToken,
    /// The reply payload.
    pub reply: Reply,
    /// `true` when the caller had vanished before the reply arrived; the
    /// real daemon silently drops such replies.
    pub dropped: bool,
}

/// One signal emission observed by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    /// Emitting object path.
    pub path: ObjectPath,
    /// Interface the signal belongs to.
    pub interface: String,
    /// Signal name.
    pub name: String,
    /// Signal payload.
    pub args: serde_json::Value,
}

struct ObjectEntry {
    path: ObjectPath,
    vtable: Arc<dyn ObjectVtable>,
}

struct SubtreeEntry {
    path: ObjectPath,
    vtable: Arc<dyn SubtreeVtable>,
    flags: SubtreeFlags,
}

struct OwnerEntry {
    name: BusName,
    handler: Arc<dyn NameOwnerHandler>,
}

struct WatchEntry {
    name: BusName,
    handler: Arc<dyn NameWatchHandler>,
}

struct State {
    next_registration: NonZeroU32,
    next_token: u64,
    objects: HashMap<RegistrationId, ObjectEntry>,
    subtrees: HashMap<RegistrationId, SubtreeEntry>,
    owners: HashMap<OwnerToken, OwnerEntry>,
    watches: HashMap<WatchToken, WatchEntry>,
    pending: HashMap<MessageToken, BusName>,
    vanished: HashSet<BusName>,
    replies: Vec<ReplyRecord>,
    signals: Vec<SignalRecord>,
    error_domains: BTreeMap<String, Vec<ErrorEntry>>,
}

enum Route {
    Object(Arc<dyn ObjectVtable>),
    Subtree {
        root: ObjectPath,
        vtable: Arc<dyn SubtreeVtable>,
        flags: SubtreeFlags,
    },
}

/// In-memory [`BusTransport`] implementation.
pub struct LoopbackBus {
    connection: ConnectionId,
    state: Mutex<State>,
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBus {
    /// Creates an empty bus with a single connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connection: ConnectionId::new(1),
            state: Mutex::new(State {
                next_registration: NonZeroU32::MIN,
                next_token: 1,
                objects: HashMap::new(),
                subtrees: HashMap::new(),
                owners: HashMap::new(),
                watches: HashMap::new(),
                pending: HashMap::new(),
                vanished: HashSet::new(),
                replies: Vec::new(),
                signals: Vec::new(),
                error_domains: BTreeMap::new(),
            }),
        }
    }

    /// The connection every registration on this bus uses.
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned loopback only happens after a test already panicked.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // -- driver side ------------------------------------------------------

    /// Grants a pending name-ownership request, firing its acquired callback.
    ///
    /// Returns `false` when the token is unknown.
    #[must_use]
    pub fn grant_name(&self, token: OwnerToken) -> bool {
        let Some(handler) = self.lock().owners.get(&token).map(|o| Arc::clone(&o.handler))
        else {
            return false;
        };
        handler.name_acquired(self.connection);
        true
    }

    /// Revokes an owned (or pending) name, firing its lost callback.
    ///
    /// Returns `false` when the token is unknown.
    #[must_use]
    pub fn revoke_name(&self, token: OwnerToken) -> bool {
        let Some(handler) = self.lock().owners.get(&token).map(|o| Arc::clone(&o.handler))
        else {
            return false;
        };
        handler.name_lost(self.connection);
        true
    }

    /// Grants every pending ownership request for `name`, for callers that
    /// never saw the token.
    ///
    /// Returns `false` when no request for `name` is live.
    #[must_use]
    pub fn grant(&self, name: &BusName) -> bool {
        let handlers: Vec<Arc<dyn NameOwnerHandler>> = {
            let state = self.lock();
            state
                .owners
                .values()
                .filter(|o| o.name == *name)
                .map(|o| Arc::clone(&o.handler))
                .collect()
        };
        let granted = !handlers.is_empty();
        for handler in handlers {
            handler.name_acquired(self.connection);
        }
        granted
    }

    /// Revokes every ownership request for `name`, firing lost callbacks.
    ///
    /// Returns `false` when no request for `name` is live.
    #[must_use]
    pub fn revoke(&self, name: &BusName) -> bool {
        let handlers: Vec<Arc<dyn NameOwnerHandler>> = {
            let state = self.lock();
            state
                .owners
                .values()
                .filter(|o| o.name == *name)
                .map(|o| Arc::clone(&o.handler))
                .collect()
        };
        let revoked = !handlers.is_empty();
        for handler in handlers {
            handler.name_lost(self.connection);
        }
        revoked
    }

    /// Returns `true` while an ownership request for `name` is live.
    #[must_use]
    pub fn owns_name(&self, name: &BusName) -> bool {
        self.lock().owners.values().any(|o| o.name == *name)
    }

    /// Makes `name`'s owner disappear: fires every matching watch handler
    /// and marks the peer so later replies to it are dropped.
    pub fn vanish(&self, name: &BusName) {
        let handlers: Vec<Arc<dyn NameWatchHandler>> = {
            let mut state = self.lock();
            state.vanished.insert(name.clone());
            state
                .watches
                .values()
                .filter(|w| w.name == *name)
                .map(|w| Arc::clone(&w.handler))
                .collect()
        };
        for handler in handlers {
            handler.name_vanished(name);
        }
    }

    /// Number of live liveness watches on `name`.
    #[must_use]
    pub fn watch_count(&self, name: &BusName) -> usize {
        self.lock().watches.values().filter(|w| w.name == *name).count()
    }

    /// Injects a method call from `sender` and routes it like the daemon.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoSuchObject`] when no registration covers `path`
    /// or the targeted child node is neither enumerated nor admitted by the
    /// subtree's flags.
    pub fn call(
        &self,
        sender: &BusName,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: serde_json::Value,
    ) -> Result<MessageToken, BusError> {
        let (route, token) = {
            let mut state = self.lock();
            let route = Self::resolve_route(&state, path)?;
            let token = MessageToken::new(state.next_token);
            state.next_token += 1;
            state.pending.insert(token, sender.clone());
            (route, token)
        };

        let call = MethodCall {
            connection: self.connection,
            sender: sender.clone(),
            path: path.clone(),
            interface: interface.to_owned(),
            method: method.to_owned(),
            args,
            message: token,
        };

        match route {
            Route::Object(vtable) => vtable.method_call(call),
            Route::Subtree { root, vtable, flags } => {
                let node = path.node_under(&root);
                if let Some(child) = node {
                    if !flags.contains(SubtreeFlags::DISPATCH_TO_UNENUMERATED_NODES)
                        && !vtable.enumerate(&root).iter().any(|n| n == child)
                    {
                        self.lock().pending.remove(&token);
                        return Err(BusError::NoSuchObject { path: path.clone() });
                    }
                }
                let resolved = vtable.dispatch(path, interface, node);
                resolved.method_call(call);
            }
        }
        Ok(token)
    }

    /// Drives the introspect callback of the subtree rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoSuchObject`] when no subtree is rooted there.
    pub fn introspect(
        &self,
        path: &ObjectPath,
        node: Option<&str>,
    ) -> Result<Vec<Arc<InterfaceSchema>>, BusError> {
        let vtable = self.subtree_vtable(path)?;
        Ok(vtable.introspect(path, node))
    }

    /// Drives the enumerate callback of the subtree rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoSuchObject`] when no subtree is rooted there.
    pub fn enumerate(&self, path: &ObjectPath) -> Result<Vec<String>, BusError> {
        let vtable = self.subtree_vtable(path)?;
        Ok(vtable.enumerate(path))
    }

    /// All replies observed so far, in arrival order.
    #[must_use]
    pub fn replies(&self) -> Vec<ReplyRecord> {
        self.lock().replies.clone()
    }

    /// All signals observed so far, in emission order.
    #[must_use]
    pub fn signals(&self) -> Vec<SignalRecord> {
        self.lock().signals.clone()
    }

    /// Returns `true` while `id` refers to a live registration of either kind.
    #[must_use]
    pub fn has_registration(&self, id: RegistrationId) -> bool {
        let state = self.lock();
        state.objects.contains_key(&id) || state.subtrees.contains_key(&id)
    }

    /// Number of live registrations of both kinds.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        let state = self.lock();
        state.objects.len() + state.subtrees.len()
    }

    /// Wire-level error names registered under `domain`.
    #[must_use]
    pub fn registered_error_names(&self, domain: &str) -> Vec<String> {
        self.lock()
            .error_domains
            .get(domain)
            .map(|entries| entries.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }

    // -- internals --------------------------------------------------------

    fn resolve_route(state: &State, path: &ObjectPath) -> Result<Route, BusError> {
        if let Some(entry) = state.objects.values().find(|o| o.path == *path) {
            return Ok(Route::Object(Arc::clone(&entry.vtable)));
        }
        let entry = state
            .subtrees
            .values()
            .filter(|s| path.is_under(&s.path))
            .max_by_key(|s| s.path.as_str().len())
            .ok_or_else(|| BusError::NoSuchObject { path: path.clone() })?;
        Ok(Route::Subtree {
            root: entry.path.clone(),
            vtable: Arc::clone(&entry.vtable),
            flags: entry.flags,
        })
    }

    fn subtree_vtable(&self, path: &ObjectPath) -> Result<Arc<dyn SubtreeVtable>, BusError> {
        let state = self.lock();
        state
            .subtrees
            .values()
            .find(|s| s.path == *path)
            .map(|s| Arc::clone(&s.vtable))
            .ok_or_else(|| BusError::NoSuchObject { path: path.clone() })
    }

    fn next_registration(state: &mut State) -> RegistrationId {
        let id = RegistrationId::new(state.next_registration);
        state.next_registration = state
            .next_registration
            .checked_add(1)
            .unwrap_or(NonZeroU32::MAX);
        id
    }

    fn next_token(state: &mut State) -> u64 {
        let token = state.next_token;
        state.next_token += 1;
        token
    }

    fn record_reply(&self, message: MessageToken, reply: Reply) -> Result<(), BusError> {
        let mut state = self.lock();
        let Some(sender) = state.pending.remove(&message) else {
            return Err(BusError::UnknownMessage(message));
        };
        let dropped = state.vanished.contains(&sender);
        state.replies.push(ReplyRecord {
            message,
            reply,
            dropped,
        });
        Ok(())
    }
}

impl BusTransport for LoopbackBus {
    fn register_object(
        &self,
        _connection: ConnectionId,
        path: &ObjectPath,
        _interface: Arc<InterfaceSchema>,
        vtable: Arc<dyn ObjectVtable>,
    ) -> Result<RegistrationId, BusError> {
        let mut state = self.lock();
        if state.objects.values().any(|o| o.path == *path) {
            return Err(BusError::PathInUse { path: path.clone() });
        }
        let id = Self::next_registration(&mut state);
        state.objects.insert(
            id,
            ObjectEntry {
                path: path.clone(),
                vtable,
            },
        );
        debug!(target: LOOPBACK_TARGET, %path, %id, "object registered");
        Ok(id)
    }

    fn register_subtree(
        &self,
        _connection: ConnectionId,
        path: &ObjectPath,
        vtable: Arc<dyn SubtreeVtable>,
        flags: SubtreeFlags,
    ) -> Result<RegistrationId, BusError> {
        let mut state = self.lock();
        if state.subtrees.values().any(|s| s.path == *path) {
            return Err(BusError::PathInUse { path: path.clone() });
        }
        let id = Self::next_registration(&mut state);
        state.subtrees.insert(
            id,
            SubtreeEntry {
                path: path.clone(),
                vtable,
                flags,
            },
        );
        debug!(target: LOOPBACK_TARGET, %path, %id, "subtree registered");
        Ok(id)
    }

    fn unregister_object(&self, _connection: ConnectionId, id: RegistrationId) -> bool {
        self.lock().objects.remove(&id).is_some()
    }

    fn unregister_subtree(&self, _connection: ConnectionId, id: RegistrationId) -> bool {
        self.lock().subtrees.remove(&id).is_some()
    }

    fn own_name(
        &self,
        name: &BusName,
        _flags: NameOwnerFlags,
        handler: Arc<dyn NameOwnerHandler>,
    ) -> OwnerToken {
        let mut state = self.lock();
        let token = OwnerToken::new(Self::next_token(&mut state));
        state.owners.insert(
            token,
            OwnerEntry {
                name: name.clone(),
                handler,
            },
        );
        token
    }

    fn unown_name(&self, token: OwnerToken) {
        self.lock().owners.remove(&token);
    }

    fn watch_name(&self, name: &BusName, handler: Arc<dyn NameWatchHandler>) -> WatchToken {
        let mut state = self.lock();
        let token = WatchToken::new(Self::next_token(&mut state));
        state.watches.insert(
            token,
            WatchEntry {
                name: name.clone(),
                handler,
            },
        );
        token
    }

    fn unwatch_name(&self, token: WatchToken) {
        self.lock().watches.remove(&token);
    }

    fn emit_signal(
        &self,
        _connection: ConnectionId,
        path: &ObjectPath,
        interface: &str,
        signal: &str,
        args: serde_json::Value,
    ) -> Result<(), BusError> {
        self.lock().signals.push(SignalRecord {
            path: path.clone(),
            interface: interface.to_owned(),
            name: signal.to_owned(),
            args,
        });
        Ok(())
    }

    fn reply_value(&self, message: MessageToken, args: serde_json::Value) -> Result<(), BusError> {
        self.record_reply(message, Reply::Value(args))
    }

    fn reply_error(&self, message: MessageToken, error: WireError) -> Result<(), BusError> {
        self.record_reply(message, Reply::Error(error))
    }

    fn register_error_domain(&self, domain: &str, entries: &[ErrorEntry]) -> Result<(), BusError> {
        if domain.is_empty() {
            return Err(BusError::InvalidErrorDomain {
                domain: domain.to_owned(),
            });
        }
        self.lock()
            .error_domains
            .entry(domain.to_owned())
            .or_default()
            .extend(entries.iter().cloned());
        Ok(())
    }
}
