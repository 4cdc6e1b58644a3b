//! Object registry: published registrations and their descriptors.
//!
//! Every successful transport registration is mirrored here by an
//! [`ObjectDescriptor`] keyed by the id the transport assigned. The registry
//! owns descriptor lifetimes: an entry appears only after the transport has
//! granted the registration and is removed exactly once, synchronously with
//! the corresponding transport unregistration.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crossbar_bus::{
    BusError, BusTransport, ConnectionId, MethodCall, ObjectPath, RegistrationId, SubtreeFlags,
};
use crossbar_schema::InterfaceCatalog;

use crate::dispatch::{ObjectDispatch, SubtreeDispatch};
use crate::errors::ErrorDomain;

pub(crate) const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Handler invoked for calls on one interface of a registration.
pub type MethodHandler = Arc<dyn Fn(&MethodCall) + Send + Sync>;

/// Decides, per (path, node, interface name), whether an interface is exposed
/// on a dynamic subtree child. `None` names the subtree root itself.
pub type InterfaceFilter = Arc<dyn Fn(&ObjectPath, Option<&str>, &str) -> bool + Send + Sync>;

/// Errors raised by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The interface index does not exist in the selected catalog.
    #[error("interface index {index} out of range for a catalog of {len}")]
    BadIndex {
        /// The rejected index.
        index: usize,
        /// Catalog length.
        len: usize,
    },

    /// A subtree was published with an empty dispatch table.
    #[error("subtree dispatch table is empty")]
    EmptyDispatchTable,

    /// The transport granted an id that is already live in the registry.
    #[error("transport reused live registration id {id}")]
    DuplicateId {
        /// The reused id.
        id: RegistrationId,
    },

    /// No registration holds the given id.
    #[error("registration {id} not found")]
    NotFound {
        /// The unknown id.
        id: RegistrationId,
    },

    /// The id refers to a registration of the other kind.
    #[error("registration {id} is not a {expected}")]
    KindMismatch {
        /// The mismatched id.
        id: RegistrationId,
        /// Expected kind, for the message.
        expected: &'static str,
    },

    /// The transport refused the registration.
    #[error("transport rejected registration: {0}")]
    Transport(#[from] BusError),
}

/// One published registration: a single object or a subtree.
pub struct ObjectDescriptor {
    root_path: Option<ObjectPath>,
    dispatch_table: Vec<MethodHandler>,
    filter: Option<InterfaceFilter>,
}

impl ObjectDescriptor {
    pub(crate) fn single(handler: MethodHandler) -> Self {
        Self {
            root_path: None,
            dispatch_table: vec![handler],
            filter: None,
        }
    }

    pub(crate) fn subtree(
        root_path: ObjectPath,
        dispatch_table: Vec<MethodHandler>,
        filter: InterfaceFilter,
    ) -> Self {
        Self {
            root_path: Some(root_path),
            dispatch_table,
            filter: Some(filter),
        }
    }

    /// The path prefix for subtree registrations, `None` for single objects.
    #[must_use]
    pub const fn root_path(&self) -> Option<&ObjectPath> {
        self.root_path.as_ref()
    }

    /// Returns `true` for subtree registrations.
    #[must_use]
    pub const fn is_subtree(&self) -> bool {
        self.root_path.is_some()
    }

    /// The handler at `index`, if the dispatch table extends that far.
    #[must_use]
    pub fn handler(&self, index: usize) -> Option<&MethodHandler> {
        self.dispatch_table.get(index)
    }

    /// Number of per-interface handlers.
    #[must_use]
    pub const fn table_len(&self) -> usize {
        self.dispatch_table.len()
    }

    pub(crate) const fn filter(&self) -> Option<&InterfaceFilter> {
        self.filter.as_ref()
    }
}

impl std::fmt::Debug for ObjectDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDescriptor")
            .field("root_path", &self.root_path)
            .field("table_len", &self.dispatch_table.len())
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct RegistryEntry {
    connection: ConnectionId,
    descriptor: Arc<ObjectDescriptor>,
}

/// Mapping from registration id to descriptor.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: HashMap<RegistrationId, RegistryEntry>,
}

impl ObjectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a single object at `path` exposing the catalog interface at
    /// `interface_index`, always dispatched through handler index 0.
    ///
    /// On any failure no registry mutation takes place.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::BadIndex`] for an out-of-range index and
    /// [`RegistryError::Transport`] when the transport refuses the path.
    pub fn publish_object(
        &mut self,
        transport: &Arc<dyn BusTransport>,
        connection: ConnectionId,
        path: &ObjectPath,
        catalog: &InterfaceCatalog,
        interface_index: usize,
        handler: MethodHandler,
    ) -> Result<RegistrationId, RegistryError> {
        let Some(interface) = catalog.get(interface_index) else {
            return Err(RegistryError::BadIndex {
                index: interface_index,
                len: catalog.len(),
            });
        };

        let descriptor = Arc::new(ObjectDescriptor::single(handler));
        let vtable = Arc::new(ObjectDispatch::new(Arc::clone(&descriptor)));
        let id = transport.register_object(connection, path, Arc::clone(interface), vtable)?;
        self.adopt(transport, connection, id, descriptor)?;

        debug!(target: REGISTRY_TARGET, %path, %id, interface = %interface.name, "object published");
        Ok(id)
    }

    /// Publishes a subtree rooted at `path`. Calls for any child node, even
    /// ones never enumerated, are dispatched to this registration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyDispatchTable`] for an empty handler
    /// table and [`RegistryError::Transport`] when the transport refuses the
    /// path.
    pub fn publish_subtree(
        &mut self,
        transport: &Arc<dyn BusTransport>,
        connection: ConnectionId,
        path: &ObjectPath,
        catalog: &Arc<InterfaceCatalog>,
        domain: &ErrorDomain,
        dispatch_table: Vec<MethodHandler>,
        filter: InterfaceFilter,
    ) -> Result<RegistrationId, RegistryError> {
        if dispatch_table.is_empty() {
            return Err(RegistryError::EmptyDispatchTable);
        }

        let descriptor = Arc::new(ObjectDescriptor::subtree(
            path.clone(),
            dispatch_table,
            filter,
        ));
        let vtable = Arc::new(SubtreeDispatch::new(
            Arc::clone(&descriptor),
            Arc::clone(catalog),
            Arc::clone(transport),
            domain.clone(),
        ));
        let id = transport.register_subtree(
            connection,
            path,
            vtable,
            SubtreeFlags::DISPATCH_TO_UNENUMERATED_NODES,
        )?;
        self.adopt_subtree(transport, connection, id, descriptor)?;

        debug!(target: REGISTRY_TARGET, %path, %id, "subtree published");
        Ok(id)
    }

    /// Removes a single-object registration: transport unregistration first,
    /// then exactly one registry removal.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id and
    /// [`RegistryError::KindMismatch`] when `id` names a subtree. Neither is
    /// fatal to the caller.
    pub fn unpublish_object(
        &mut self,
        transport: &Arc<dyn BusTransport>,
        connection: ConnectionId,
        id: RegistrationId,
    ) -> Result<(), RegistryError> {
        self.unpublish(transport, connection, id, false)
    }

    /// Removes a subtree registration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id and
    /// [`RegistryError::KindMismatch`] when `id` names a single object.
    pub fn unpublish_subtree(
        &mut self,
        transport: &Arc<dyn BusTransport>,
        connection: ConnectionId,
        id: RegistrationId,
    ) -> Result<(), RegistryError> {
        self.unpublish(transport, connection, id, true)
    }

    /// Unregisters every live registration, emptying the registry. Each entry
    /// is retired on the connection it was published against.
    pub fn retire_all(&mut self, transport: &Arc<dyn BusTransport>) {
        for (id, entry) in self.objects.drain() {
            if entry.descriptor.is_subtree() {
                transport.unregister_subtree(entry.connection, id);
            } else {
                transport.unregister_object(entry.connection, id);
            }
            debug!(target: REGISTRY_TARGET, %id, "registration retired");
        }
    }

    /// Looks up a descriptor by id.
    #[must_use]
    pub fn get(&self, id: RegistrationId) -> Option<&Arc<ObjectDescriptor>> {
        self.objects.get(&id).map(|entry| &entry.descriptor)
    }

    /// Returns `true` while `id` is live.
    #[must_use]
    pub fn contains(&self, id: RegistrationId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` when nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn adopt(
        &mut self,
        transport: &Arc<dyn BusTransport>,
        connection: ConnectionId,
        id: RegistrationId,
        descriptor: Arc<ObjectDescriptor>,
    ) -> Result<(), RegistryError> {
        if self.objects.contains_key(&id) {
            // A transport reusing a live id breaks the uniqueness invariant;
            // undo the grant rather than clobber the live entry.
            transport.unregister_object(connection, id);
            return Err(RegistryError::DuplicateId { id });
        }
        self.objects.insert(
            id,
            RegistryEntry {
                connection,
                descriptor,
            },
        );
        Ok(())
    }

    fn adopt_subtree(
        &mut self,
        transport: &Arc<dyn BusTransport>,
        connection: ConnectionId,
        id: RegistrationId,
        descriptor: Arc<ObjectDescriptor>,
    ) -> Result<(), RegistryError> {
        if self.objects.contains_key(&id) {
            transport.unregister_subtree(connection, id);
            return Err(RegistryError::DuplicateId { id });
        }
        self.objects.insert(
            id,
            RegistryEntry {
                connection,
                descriptor,
            },
        );
        Ok(())
    }

    fn unpublish(
        &mut self,
        transport: &Arc<dyn BusTransport>,
        connection: ConnectionId,
        id: RegistrationId,
        expect_subtree: bool,
    ) -> Result<(), RegistryError> {
        let Some(entry) = self.objects.get(&id) else {
            return Err(RegistryError::NotFound { id });
        };
        if entry.descriptor.is_subtree() != expect_subtree {
            return Err(RegistryError::KindMismatch {
                id,
                expected: if expect_subtree { "subtree" } else { "object" },
            });
        }
        if expect_subtree {
            transport.unregister_subtree(connection, id);
        } else {
            transport.unregister_object(connection, id);
        }
        self.objects.remove(&id);
        debug!(target: REGISTRY_TARGET, %id, "registration unpublished");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
