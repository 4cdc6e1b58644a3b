//! Call dispatch: from a routed transport call to a service handler.
//!
//! Single objects route every call through handler index 0. Subtrees resolve
//! the interface named by the call to its position in the server interface
//! catalog and route through the handler at that position. Resolution misses
//! are an explicit outcome: the engine replies `UnknownInterface` on the
//! service's behalf instead of indexing past the end of the handler table.

use std::sync::Arc;

use tracing::{debug, warn};

use crossbar_bus::{BusTransport, MethodCall, ObjectPath, ObjectVtable, SubtreeVtable};
use crossbar_schema::{InterfaceCatalog, InterfaceSchema};

use crate::errors::{ErrorDomain, ErrorKind};
use crate::registry::ObjectDescriptor;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Vtable for a published single object: always handler index 0.
pub(crate) struct ObjectDispatch {
    descriptor: Arc<ObjectDescriptor>,
}

impl ObjectDispatch {
    pub(crate) const fn new(descriptor: Arc<ObjectDescriptor>) -> Self {
        Self { descriptor }
    }
}

impl ObjectVtable for ObjectDispatch {
    fn method_call(&self, call: MethodCall) {
        debug!(
            target: DISPATCH_TARGET,
            path = %call.path,
            interface = %call.interface,
            method = %call.method,
            "dispatching object call"
        );
        let Some(handler) = self.descriptor.handler(0) else {
            // Unreachable through publish_object, which always builds a
            // one-entry table.
            warn!(
                target: DISPATCH_TARGET,
                path = %call.path,
                "object registration has no handler"
            );
            return;
        };
        handler(&call);
    }
}

/// Vtable for a published subtree: interface-index resolution plus filtered
/// introspection for dynamic children.
pub(crate) struct SubtreeDispatch {
    descriptor: Arc<ObjectDescriptor>,
    catalog: Arc<InterfaceCatalog>,
    transport: Arc<dyn BusTransport>,
    domain: ErrorDomain,
}

impl SubtreeDispatch {
    pub(crate) const fn new(
        descriptor: Arc<ObjectDescriptor>,
        catalog: Arc<InterfaceCatalog>,
        transport: Arc<dyn BusTransport>,
        domain: ErrorDomain,
    ) -> Self {
        Self {
            descriptor,
            catalog,
            transport,
            domain,
        }
    }
}

impl SubtreeVtable for SubtreeDispatch {
    fn enumerate(&self, _path: &ObjectPath) -> Vec<String> {
        // Child names are discovered lazily; validity is deferred entirely to
        // the unenumerated-dispatch registration flag.
        Vec::new()
    }

    fn introspect(&self, path: &ObjectPath, node: Option<&str>) -> Vec<Arc<InterfaceSchema>> {
        let Some(filter) = self.descriptor.filter() else {
            return Vec::new();
        };
        // Filter decisions are queried fresh on every request; the transport
        // may cache the returned interfaces, this layer never does.
        self.catalog
            .iter()
            .take(self.descriptor.table_len())
            .filter(|interface| filter(path, node, &interface.name))
            .cloned()
            .collect()
    }

    fn dispatch(
        &self,
        path: &ObjectPath,
        interface: &str,
        _node: Option<&str>,
    ) -> Arc<dyn ObjectVtable> {
        let Some(interface_index) = self.catalog.position(interface) else {
            // An unmatched interface name must never become a handler index.
            // The caller gets a named error instead.
            debug!(
                target: DISPATCH_TARGET,
                %path,
                interface,
                "call names an interface absent from the server catalog"
            );
            return Arc::new(UnknownInterfaceReply {
                transport: Arc::clone(&self.transport),
                domain: self.domain.clone(),
            });
        };
        Arc::new(ResolvedCall {
            descriptor: Arc::clone(&self.descriptor),
            interface_index,
            transport: Arc::clone(&self.transport),
            domain: self.domain.clone(),
        })
    }
}

/// Ephemeral per-call routing context for one resolved subtree call.
///
/// Holds the owning descriptor and the resolved interface index; handed to
/// the transport for exactly one invocation and then discarded.
pub(crate) struct ResolvedCall {
    descriptor: Arc<ObjectDescriptor>,
    interface_index: usize,
    transport: Arc<dyn BusTransport>,
    domain: ErrorDomain,
}

impl ObjectVtable for ResolvedCall {
    fn method_call(&self, call: MethodCall) {
        debug!(
            target: DISPATCH_TARGET,
            path = %call.path,
            interface = %call.interface,
            method = %call.method,
            interface_index = self.interface_index,
            "dispatching subtree call"
        );
        let Some(handler) = self.descriptor.handler(self.interface_index) else {
            // The interface exists in the catalog but the registration's
            // handler table is shorter; same guarded outcome as an
            // unmatched interface name.
            warn!(
                target: DISPATCH_TARGET,
                path = %call.path,
                interface = %call.interface,
                interface_index = self.interface_index,
                table_len = self.descriptor.table_len(),
                "interface index outside the handler table"
            );
            reply_unknown_interface(&*self.transport, &self.domain, &call);
            return;
        };
        handler(&call);
    }
}

/// Terminal vtable for calls naming an interface the subtree does not serve.
struct UnknownInterfaceReply {
    transport: Arc<dyn BusTransport>,
    domain: ErrorDomain,
}

impl ObjectVtable for UnknownInterfaceReply {
    fn method_call(&self, call: MethodCall) {
        reply_unknown_interface(&*self.transport, &self.domain, &call);
    }
}

fn reply_unknown_interface(transport: &dyn BusTransport, domain: &ErrorDomain, call: &MethodCall) {
    let error = domain.wire_error(
        ErrorKind::UnknownInterface,
        format!("unknown interface '{}'", call.interface),
    );
    if let Err(error) = transport.reply_error(call.message, error) {
        warn!(
            target: DISPATCH_TARGET,
            path = %call.path,
            interface = %call.interface,
            error = %error,
            "failed to reply UnknownInterface"
        );
    }
}
