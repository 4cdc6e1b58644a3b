//! Client presence tracking keyed by bus name.
//!
//! A client becomes tracked the first time the service asks for it, backed by
//! one transport liveness watch. When a watched peer disappears the owning
//! connector reports the loss to the service first and cleans the entry up
//! second, so the service can still key its own teardown by the name.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crossbar_bus::{BusName, BusTransport, NameWatchHandler, WatchToken};

pub(crate) const PRESENCE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::presence");

/// Errors raised by presence operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresenceError {
    /// The name is not tracked. Unwatching an untracked name is a
    /// programming error in the caller, surfaced loudly rather than ignored.
    #[error("client '{name}' is not watched")]
    NotWatched {
        /// The untracked name.
        name: BusName,
    },
}

/// Mapping from client name to its liveness-watch handle.
#[derive(Debug, Default)]
pub struct ClientTracker {
    clients: HashMap<BusName, WatchToken>,
}

impl ClientTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching `name` unless it is already tracked.
    ///
    /// Returns `true` when the watch is newly added; an idempotent re-watch
    /// returns `false` and leaves the single existing watch in place.
    pub fn watch(
        &mut self,
        transport: &dyn BusTransport,
        name: &BusName,
        handler: Arc<dyn NameWatchHandler>,
    ) -> bool {
        if self.clients.contains_key(name) {
            return false;
        }
        let token = transport.watch_name(name, handler);
        self.clients.insert(name.clone(), token);
        debug!(target: PRESENCE_TARGET, client = %name, "client watch added");
        true
    }

    /// Stops watching `name`: entry removal, then transport unwatch.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::NotWatched`] when `name` is not tracked.
    pub fn unwatch(
        &mut self,
        transport: &dyn BusTransport,
        name: &BusName,
    ) -> Result<(), PresenceError> {
        let Some(token) = self.clients.remove(name) else {
            return Err(PresenceError::NotWatched { name: name.clone() });
        };
        transport.unwatch_name(token);
        debug!(target: PRESENCE_TARGET, client = %name, "client watch removed");
        Ok(())
    }

    /// Stops every watch, emptying the tracker.
    pub fn retire_all(&mut self, transport: &dyn BusTransport) {
        for (name, token) in self.clients.drain() {
            transport.unwatch_name(token);
            debug!(target: PRESENCE_TARGET, client = %name, "client watch retired");
        }
    }

    /// Returns `true` while `name` is tracked.
    #[must_use]
    pub fn is_watched(&self, name: &BusName) -> bool {
        self.clients.contains_key(name)
    }

    /// Number of tracked clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` when no client is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
