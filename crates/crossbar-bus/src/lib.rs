//! Bus abstraction consumed by the connector layer.
//!
//! The crate defines the typed handles, validated names, and vtable traits a
//! message-bus binding must provide, behind the [`BusTransport`] trait. No
//! concrete bus is bound here; the `test-support` feature adds an in-memory
//! [`loopback::LoopbackBus`] and a mock transport for exercising consumers.

pub mod handle;
#[cfg(feature = "test-support")]
pub mod loopback;
pub mod name;
pub mod transport;

pub use handle::{ConnectionId, MessageToken, OwnerToken, RegistrationId, WatchToken};
pub use name::{BusName, NameError, ObjectPath, PathError};
#[cfg(feature = "test-support")]
pub use transport::MockBusTransport;
pub use transport::{
    BusError, BusTransport, ErrorEntry, MethodCall, NameOwnerFlags, NameOwnerHandler,
    NameWatchHandler, ObjectVtable, SubtreeFlags, SubtreeVtable, WireError,
};
