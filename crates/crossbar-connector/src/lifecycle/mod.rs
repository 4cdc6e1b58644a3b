//! Connection lifecycle: one [`Connector`] per service process.
//!
//! A connector is built once from parsed schemas, requests a well-known name,
//! reports the outcome through injected [`ConnectorEvents`], and then fronts
//! every other operation of the crate: publication, presence watches, replies
//! and signals. Shutdown retires watches and registrations in that order and
//! is terminal; a shut-down connector refuses further work.
//!
//! Event callbacks are always invoked with no connector lock held, so a
//! service may re-enter the connector (for example to publish its root
//! object) from inside `connected`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crossbar_bus::{
    BusError, BusName, BusTransport, ConnectionId, MessageToken, NameOwnerFlags, NameOwnerHandler,
    NameWatchHandler, ObjectPath, OwnerToken, RegistrationId,
};
use crossbar_schema::{InterfaceCatalog, NodeDocument, SchemaError};

use crate::errors::{register_error_domain, DomainError, ErrorDomain, ErrorKind};
use crate::presence::{ClientTracker, PresenceError};
use crate::registry::{InterfaceFilter, MethodHandler, ObjectRegistry, RegistryError};
use crate::settings::Settings;

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Callbacks a service injects at construction to observe the connection.
///
/// `connected` and `disconnected` fire at most once per ownership outcome;
/// `client_lost` fires at most once per watched name, before the watch is
/// torn down.
pub trait ConnectorEvents: Send + Sync {
    /// The well-known name was acquired on `connection`.
    fn connected(&self, connection: ConnectionId);

    /// The well-known name was lost, or never acquired.
    fn disconnected(&self, connection: ConnectionId);

    /// A watched client's name lost its owner.
    fn client_lost(&self, name: &BusName);
}

/// Which parsed interface catalog a publication draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRole {
    /// The root object's catalog.
    Root,
    /// The server subtree catalog.
    Server,
}

/// The two introspection documents a connector is built from.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorSchemas<'a> {
    /// Document describing the root object.
    pub root: &'a str,
    /// Document describing server objects under the root.
    pub server: &'a str,
}

/// Errors raised while building a connector.
#[derive(Debug, Error)]
pub enum InitializeError {
    /// The root schema document failed to parse or validate.
    #[error("root schema rejected: {0}")]
    RootSchema(#[source] SchemaError),

    /// The server schema document failed to parse or validate.
    #[error("server schema rejected: {0}")]
    ServerSchema(#[source] SchemaError),

    /// The service name is not a valid error-domain stem.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The transport refused the error-domain registration.
    #[error("error domain registration failed: {0}")]
    ErrorRegistration(#[source] BusError),
}

/// Errors raised by lifecycle operations after construction.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `connect` was called while a connection attempt is already live.
    #[error("connector is already connecting or connected")]
    AlreadyConnected,

    /// The operation arrived after `shutdown`.
    #[error("connector has been shut down")]
    ShutDown,

    /// The connector state lock was poisoned by a panicking holder.
    #[error("internal connector failure: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// A publication operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A presence operation failed.
    #[error(transparent)]
    Presence(#[from] PresenceError),

    /// The transport refused a reply or signal.
    #[error("transport operation failed: {source}")]
    Transport {
        /// The transport's refusal.
        source: BusError,
    },
}

/// Where the connector is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built, no connection attempt yet.
    Initialized,
    /// `connect` issued, outcome pending.
    Connecting,
    /// The well-known name is held.
    Connected,
    /// The name was lost or released.
    Disconnected,
    /// Terminal; all registrations and watches retired.
    Shutdown,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    connection: Option<ConnectionId>,
    owner: Option<OwnerToken>,
    registry: ObjectRegistry,
    clients: ClientTracker,
}

impl State {
    fn new() -> Self {
        Self {
            phase: Phase::Initialized,
            connection: None,
            owner: None,
            registry: ObjectRegistry::new(),
            clients: ClientTracker::new(),
        }
    }
}

/// One service's connection to the bus.
pub struct Connector {
    transport: Arc<dyn BusTransport>,
    root_catalog: Arc<InterfaceCatalog>,
    server_catalog: Arc<InterfaceCatalog>,
    domain: ErrorDomain,
    owner_flags: NameOwnerFlags,
    events: Arc<dyn ConnectorEvents>,
    state: Arc<Mutex<State>>,
}

impl Connector {
    /// Builds a connector: parses both schema documents, derives the error
    /// domain from `service`, and registers the domain with the transport.
    ///
    /// No connection attempt is made; call [`Connector::connect`] next.
    ///
    /// # Errors
    ///
    /// Returns [`InitializeError::RootSchema`] or
    /// [`InitializeError::ServerSchema`] for a rejected document,
    /// [`InitializeError::Domain`] for an unusable service name and
    /// [`InitializeError::ErrorRegistration`] when the transport refuses the
    /// domain.
    pub fn initialize(
        transport: Arc<dyn BusTransport>,
        schemas: ConnectorSchemas<'_>,
        service: &str,
        settings: &Settings,
        events: Arc<dyn ConnectorEvents>,
    ) -> Result<Self, InitializeError> {
        let root = NodeDocument::parse(schemas.root).map_err(InitializeError::RootSchema)?;
        let server = NodeDocument::parse(schemas.server).map_err(InitializeError::ServerSchema)?;
        let domain = ErrorDomain::new(service)?;
        register_error_domain(&*transport, &domain)
            .map_err(InitializeError::ErrorRegistration)?;

        info!(
            target: LIFECYCLE_TARGET,
            service,
            root_interfaces = root.interfaces.len(),
            server_interfaces = server.interfaces.len(),
            "connector initialised"
        );
        Ok(Self {
            transport,
            root_catalog: Arc::new(InterfaceCatalog::from_document(root)),
            server_catalog: Arc::new(InterfaceCatalog::from_document(server)),
            domain,
            owner_flags: settings.owner_flags(),
            events,
            state: Arc::new(Mutex::new(State::new())),
        })
    }

    /// Requests ownership of `service_name`. The outcome arrives on the
    /// injected [`ConnectorEvents`].
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyConnected`] while a previous attempt
    /// is live and [`LifecycleError::ShutDown`] after shutdown.
    pub fn connect(&self, service_name: &BusName) -> Result<(), LifecycleError> {
        let stale = {
            let mut state = self.lock()?;
            match state.phase {
                Phase::Shutdown => return Err(LifecycleError::ShutDown),
                Phase::Connecting | Phase::Connected => {
                    return Err(LifecycleError::AlreadyConnected);
                }
                Phase::Initialized | Phase::Disconnected => {}
            }
            state.phase = Phase::Connecting;
            state.owner.take()
        };
        // A token left over from a lost name still carries a live relay.
        // Release it so only the new request can flip the phase.
        if let Some(token) = stale {
            self.transport.unown_name(token);
        }

        let relay = Arc::new(OwnerRelay {
            events: Arc::clone(&self.events),
            state: Arc::clone(&self.state),
        });
        let token = self.transport.own_name(service_name, self.owner_flags, relay);
        {
            let mut state = self.lock()?;
            state.owner = Some(token);
        }
        info!(target: LIFECYCLE_TARGET, name = %service_name, "ownership requested");
        Ok(())
    }

    /// Releases the well-known name, if held or pending. Publications and
    /// watches stay in place. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Internal`] only when the state lock is
    /// poisoned.
    pub fn disconnect(&self) -> Result<(), LifecycleError> {
        let held = {
            let mut state = self.lock()?;
            state.owner.take()
        };
        let Some(token) = held else {
            return Ok(());
        };
        self.transport.unown_name(token);
        let mut state = self.lock()?;
        if matches!(state.phase, Phase::Connecting | Phase::Connected) {
            state.phase = Phase::Disconnected;
        }
        debug!(target: LIFECYCLE_TARGET, "ownership released");
        Ok(())
    }

    /// Tears the connector down: releases the name, retires every client
    /// watch, then retires every registration. Terminal and idempotent.
    ///
    /// No `disconnected` or `client_lost` callbacks fire for teardown
    /// performed here.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Internal`] only when the state lock is
    /// poisoned.
    pub fn shutdown(&self) -> Result<(), LifecycleError> {
        self.disconnect()?;
        let mut state = self.lock()?;
        state.clients.retire_all(&*self.transport);
        state.registry.retire_all(&self.transport);
        state.connection = None;
        state.phase = Phase::Shutdown;
        info!(target: LIFECYCLE_TARGET, "connector shut down");
        Ok(())
    }

    /// Publishes a single object at `path` exposing one interface from the
    /// chosen catalog.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ShutDown`] after shutdown and
    /// [`LifecycleError::Registry`] when the index or path is rejected.
    pub fn publish_object(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        role: SchemaRole,
        interface_index: usize,
        handler: MethodHandler,
    ) -> Result<RegistrationId, LifecycleError> {
        let mut state = self.live(self.lock()?)?;
        let catalog = match role {
            SchemaRole::Root => &self.root_catalog,
            SchemaRole::Server => &self.server_catalog,
        };
        let id = state.registry.publish_object(
            &self.transport,
            connection,
            path,
            catalog,
            interface_index,
            handler,
        )?;
        Ok(id)
    }

    /// Publishes a subtree rooted at `path`, dispatching server-catalog
    /// interfaces through `dispatch_table` and exposing, per node, only the
    /// interfaces `filter` admits.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ShutDown`] after shutdown and
    /// [`LifecycleError::Registry`] when the table or path is rejected.
    pub fn publish_subtree(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        dispatch_table: Vec<MethodHandler>,
        filter: InterfaceFilter,
    ) -> Result<RegistrationId, LifecycleError> {
        let mut state = self.live(self.lock()?)?;
        let id = state.registry.publish_subtree(
            &self.transport,
            connection,
            path,
            &self.server_catalog,
            &self.domain,
            dispatch_table,
            filter,
        )?;
        Ok(id)
    }

    /// Withdraws a single-object registration.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Registry`] for an unknown or mismatched id.
    pub fn unpublish_object(
        &self,
        connection: ConnectionId,
        id: RegistrationId,
    ) -> Result<(), LifecycleError> {
        let mut state = self.lock()?;
        state
            .registry
            .unpublish_object(&self.transport, connection, id)?;
        Ok(())
    }

    /// Withdraws a subtree registration.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Registry`] for an unknown or mismatched id.
    pub fn unpublish_subtree(
        &self,
        connection: ConnectionId,
        id: RegistrationId,
    ) -> Result<(), LifecycleError> {
        let mut state = self.lock()?;
        state
            .registry
            .unpublish_subtree(&self.transport, connection, id)?;
        Ok(())
    }

    /// Starts watching a client's liveness. Returns `true` when the watch is
    /// newly added; re-watching a tracked name is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ShutDown`] after shutdown.
    pub fn watch_client(&self, name: &BusName) -> Result<bool, LifecycleError> {
        let mut state = self.live(self.lock()?)?;
        let relay = Arc::new(WatchRelay {
            transport: Arc::clone(&self.transport),
            events: Arc::clone(&self.events),
            state: Arc::clone(&self.state),
        });
        Ok(state.clients.watch(&*self.transport, name, relay))
    }

    /// Stops watching a client without waiting for it to vanish.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Presence`] when `name` is not watched.
    pub fn unwatch_client(&self, name: &BusName) -> Result<(), LifecycleError> {
        let mut state = self.lock()?;
        state.clients.unwatch(&*self.transport, name)?;
        Ok(())
    }

    /// Replies to an in-flight invocation with a value.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transport`] when the token no longer names a
    /// pending call.
    pub fn return_response(
        &self,
        message: MessageToken,
        args: serde_json::Value,
    ) -> Result<(), LifecycleError> {
        self.transport
            .reply_value(message, args)
            .map_err(|source| LifecycleError::Transport { source })
    }

    /// Replies to an in-flight invocation with a named error from this
    /// connector's domain.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transport`] when the token no longer names a
    /// pending call.
    pub fn return_error(
        &self,
        message: MessageToken,
        kind: ErrorKind,
        text: impl Into<String>,
    ) -> Result<(), LifecycleError> {
        self.transport
            .reply_error(message, self.domain.wire_error(kind, text))
            .map_err(|source| LifecycleError::Transport { source })
    }

    /// Emits a signal from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transport`] when the transport refuses the
    /// emission.
    pub fn notify(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        interface: &str,
        signal: &str,
        args: serde_json::Value,
    ) -> Result<(), LifecycleError> {
        self.transport
            .emit_signal(connection, path, interface, signal, args)
            .map_err(|source| LifecycleError::Transport { source })
    }

    /// Current lifecycle phase.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Internal`] only when the state lock is
    /// poisoned.
    pub fn phase(&self) -> Result<Phase, LifecycleError> {
        Ok(self.lock()?.phase)
    }

    /// The connection the name was acquired on, while connected.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Internal`] only when the state lock is
    /// poisoned.
    pub fn connection(&self) -> Result<Option<ConnectionId>, LifecycleError> {
        Ok(self.lock()?.connection)
    }

    /// The error domain derived from the service name.
    #[must_use]
    pub const fn error_domain(&self) -> &ErrorDomain {
        &self.domain
    }

    /// The root object's interface catalog.
    #[must_use]
    pub const fn root_interfaces(&self) -> &Arc<InterfaceCatalog> {
        &self.root_catalog
    }

    /// The server subtree interface catalog.
    #[must_use]
    pub const fn server_interfaces(&self) -> &Arc<InterfaceCatalog> {
        &self.server_catalog
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, LifecycleError> {
        self.state.lock().map_err(|_| LifecycleError::Internal {
            message: "connector state lock poisoned".to_owned(),
        })
    }

    fn live<'a>(
        &self,
        state: MutexGuard<'a, State>,
    ) -> Result<MutexGuard<'a, State>, LifecycleError> {
        if state.phase == Phase::Shutdown {
            return Err(LifecycleError::ShutDown);
        }
        Ok(state)
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("domain", &self.domain)
            .field("owner_flags", &self.owner_flags)
            .finish_non_exhaustive()
    }
}

/// Forwards ownership outcomes into connector state, then to the service.
struct OwnerRelay {
    events: Arc<dyn ConnectorEvents>,
    state: Arc<Mutex<State>>,
}

impl NameOwnerHandler for OwnerRelay {
    fn name_acquired(&self, connection: ConnectionId) {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.connection = Some(connection);
            state.phase = Phase::Connected;
        }
        info!(target: LIFECYCLE_TARGET, connection = connection.raw(), "name acquired");
        // The lock is released first; the service may publish from here.
        self.events.connected(connection);
    }

    fn name_lost(&self, connection: ConnectionId) {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if state.phase != Phase::Shutdown {
                state.phase = Phase::Disconnected;
            }
        }
        warn!(target: LIFECYCLE_TARGET, connection = connection.raw(), "name lost");
        self.events.disconnected(connection);
    }
}

/// Forwards a client's disappearance to the service, then drops the watch.
struct WatchRelay {
    transport: Arc<dyn BusTransport>,
    events: Arc<dyn ConnectorEvents>,
    state: Arc<Mutex<State>>,
}

impl NameWatchHandler for WatchRelay {
    fn name_vanished(&self, name: &BusName) {
        info!(target: LIFECYCLE_TARGET, client = %name, "client vanished");
        // Notify while the watch entry is still visible to the service.
        self.events.client_lost(name);
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.clients.unwatch(&*self.transport, name).is_err() {
            // Already removed by an explicit unwatch racing the vanish.
            debug!(target: LIFECYCLE_TARGET, client = %name, "vanish for untracked client");
        }
    }
}
