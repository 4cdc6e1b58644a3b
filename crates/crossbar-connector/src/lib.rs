//! Bus-agnostic connector layer for schema-described services.
//!
//! A service hands the connector its introspection documents and a
//! [`BusTransport`], receives a [`Connector`], and from then on publishes
//! objects and subtrees, watches client liveness, replies to invocations and
//! emits signals without touching the underlying bus binding. Incoming calls
//! are routed by interface name through per-registration dispatch tables; an
//! interface the schema does not declare draws an explicit error reply rather
//! than reaching a handler.
//!
//! [`BusTransport`]: crossbar_bus::BusTransport

mod dispatch;
pub mod errors;
pub mod lifecycle;
pub mod presence;
pub mod registry;
pub mod settings;
pub mod telemetry;

pub use errors::{register_error_domain, DomainError, ErrorDomain, ErrorKind};
pub use lifecycle::{
    Connector, ConnectorEvents, ConnectorSchemas, InitializeError, LifecycleError, Phase,
    SchemaRole,
};
pub use presence::{ClientTracker, PresenceError};
pub use registry::{
    InterfaceFilter, MethodHandler, ObjectDescriptor, ObjectRegistry, RegistryError,
};
pub use settings::{BusKind, LogFormat, Settings, SettingsError};
pub use telemetry::{initialise, TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
