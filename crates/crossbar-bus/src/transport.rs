//! The transport boundary: traits and data exchanged with the bus daemon.
//!
//! Everything the connector consumes from the underlying bus is expressed
//! through [`BusTransport`]; everything the transport drives back into the
//! connector arrives through the vtable and handler traits. Wire framing,
//! authentication, and name resolution all live on the far side of this
//! boundary.

use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crossbar_schema::InterfaceSchema;

use crate::handle::{ConnectionId, MessageToken, OwnerToken, RegistrationId, WatchToken};
use crate::name::{BusName, ObjectPath};

bitflags! {
    /// Flags applied to a subtree registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubtreeFlags: u32 {
        /// Route calls for child nodes the subtree never enumerated.
        const DISPATCH_TO_UNENUMERATED_NODES = 1;
    }
}

bitflags! {
    /// Flags applied to a bus-name ownership request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NameOwnerFlags: u32 {
        /// Permit another peer to take the name over.
        const ALLOW_REPLACEMENT = 1;
        /// Take the name over from its current owner if permitted.
        const REPLACE_EXISTING = 1 << 1;
    }
}

/// One incoming method invocation, as delivered to a handler.
#[derive(Debug, Clone)]
pub struct MethodCall {
    /// Connection the call arrived on.
    pub connection: ConnectionId,
    /// Unique name of the calling peer.
    pub sender: BusName,
    /// Object path the call targets.
    pub path: ObjectPath,
    /// Interface named by the call.
    pub interface: String,
    /// Method named by the call.
    pub method: String,
    /// Call arguments; wire decoding already done by the transport.
    pub args: serde_json::Value,
    /// Token for the in-flight invocation; exactly one reply is owed on it.
    pub message: MessageToken,
}

/// An error reply as it crosses the wire: a namespaced name plus free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError {
    /// Stable, namespaced error identifier.
    pub name: String,
    /// Human-readable description.
    pub message: String,
}

/// One (code, namespaced identifier) pair in an error domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    /// Application-level error code.
    pub code: u32,
    /// Stable wire-level error name.
    pub name: String,
}

/// Errors reported by the transport.
#[derive(Debug, Error)]
pub enum BusError {
    /// Another registration already covers the path.
    #[error("path '{path}' is already registered")]
    PathInUse {
        /// The contested path.
        path: ObjectPath,
    },

    /// No registration serves the path.
    #[error("no object registered at '{path}'")]
    NoSuchObject {
        /// The unresolved path.
        path: ObjectPath,
    },

    /// The registration id is unknown to the transport.
    #[error("registration {id} is not active")]
    NoSuchRegistration {
        /// The unknown id.
        id: RegistrationId,
    },

    /// The message token does not refer to an in-flight invocation.
    #[error("message token {0:?} is not awaiting a reply")]
    UnknownMessage(MessageToken),

    /// The operation needs a connection the transport does not hold.
    #[error("transport is not connected")]
    NotConnected,

    /// The error domain token is malformed.
    #[error("invalid error domain '{domain}'")]
    InvalidErrorDomain {
        /// The rejected domain token.
        domain: String,
    },
}

/// Receives method invocations for a registered object.
pub trait ObjectVtable: Send + Sync {
    /// Handles one incoming call. The implementation owes exactly one reply
    /// on `call.message`, now or later.
    fn method_call(&self, call: MethodCall);
}

/// Receives the transport's subtree callbacks for one subtree registration.
pub trait SubtreeVtable: Send + Sync {
    /// Lists dynamically known child node names under `path`.
    fn enumerate(&self, path: &ObjectPath) -> Vec<String>;

    /// Returns the interfaces exposed on `node` under `path`, in catalog
    /// order. `None` names the subtree root itself.
    fn introspect(&self, path: &ObjectPath, node: Option<&str>) -> Vec<Arc<InterfaceSchema>>;

    /// Resolves the vtable that will take the next call for the given
    /// interface on the given node. Called once per incoming call.
    fn dispatch(
        &self,
        path: &ObjectPath,
        interface: &str,
        node: Option<&str>,
    ) -> Arc<dyn ObjectVtable>;
}

/// Receives the two terminal outcomes of a name-ownership request.
pub trait NameOwnerHandler: Send + Sync {
    /// The name was acquired on `connection`.
    fn name_acquired(&self, connection: ConnectionId);

    /// The name was lost, or could not be acquired in the first place.
    fn name_lost(&self, connection: ConnectionId);
}

/// Receives liveness notifications for a watched peer.
pub trait NameWatchHandler: Send + Sync {
    /// The watched peer's name lost its owner.
    fn name_vanished(&self, name: &BusName);
}

/// Per-call transport primitives consumed by the connector.
///
/// Implementations wrap a concrete bus library; the `test-support` feature
/// gives workspace tests an in-memory stand-in and a generated mock.
#[cfg_attr(feature = "test-support", mockall::automock)]
pub trait BusTransport: Send + Sync {
    /// Registers a single object at `path` exposing exactly `interface`.
    fn register_object(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        interface: Arc<InterfaceSchema>,
        vtable: Arc<dyn ObjectVtable>,
    ) -> Result<RegistrationId, BusError>;

    /// Registers a subtree rooted at `path`.
    fn register_subtree(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        vtable: Arc<dyn SubtreeVtable>,
        flags: SubtreeFlags,
    ) -> Result<RegistrationId, BusError>;

    /// Removes an object registration. Returns `false` when `id` was not an
    /// active object registration.
    fn unregister_object(&self, connection: ConnectionId, id: RegistrationId) -> bool;

    /// Removes a subtree registration. Returns `false` when `id` was not an
    /// active subtree registration.
    fn unregister_subtree(&self, connection: ConnectionId, id: RegistrationId) -> bool;

    /// Requests ownership of `name`. The outcome arrives asynchronously on
    /// `handler`; no retry is performed by the transport.
    fn own_name(
        &self,
        name: &BusName,
        flags: NameOwnerFlags,
        handler: Arc<dyn NameOwnerHandler>,
    ) -> OwnerToken;

    /// Releases a name-ownership request.
    fn unown_name(&self, token: OwnerToken);

    /// Begins watching the liveness of `name`'s owner.
    fn watch_name(&self, name: &BusName, handler: Arc<dyn NameWatchHandler>) -> WatchToken;

    /// Stops a liveness watch.
    fn unwatch_name(&self, token: WatchToken);

    /// Emits a signal from `path`.
    fn emit_signal(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        interface: &str,
        signal: &str,
        args: serde_json::Value,
    ) -> Result<(), BusError>;

    /// Replies to an in-flight invocation with a value.
    fn reply_value(&self, message: MessageToken, args: serde_json::Value) -> Result<(), BusError>;

    /// Replies to an in-flight invocation with an error.
    fn reply_error(&self, message: MessageToken, error: WireError) -> Result<(), BusError>;

    /// Registers an error domain's (code, name) pairs in the process-wide
    /// error-name table.
    fn register_error_domain(&self, domain: &str, entries: &[ErrorEntry]) -> Result<(), BusError>;
}
