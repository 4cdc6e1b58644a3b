//! Opaque handle types exchanged with the transport.
//!
//! The transport identifies connections, registrations, in-flight messages,
//! name ownership requests, and liveness watches by opaque tokens. Each gets
//! its own newtype so handles of different kinds cannot be confused, and none
//! of them is ever reinterpreted as a pointer.

use std::fmt;
use std::num::NonZeroU32;

/// Identifies an active bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw transport connection identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Identifies a successful object or subtree registration.
///
/// The transport reports failure through `Result`, never through a reserved
/// zero value, so the inner integer is non-zero by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(NonZeroU32);

impl RegistrationId {
    /// Wraps a non-zero registration identifier.
    #[must_use]
    pub const fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    /// Builds a registration id from a raw integer, rejecting zero.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one in-flight method invocation awaiting exactly one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageToken(u64);

impl MessageToken {
    /// Wraps a raw message token.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw token.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Identifies a pending or granted bus-name ownership request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Wraps a raw owner token.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw token.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Identifies an active peer-liveness watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(u64);

impl WatchToken {
    /// Wraps a raw watch token.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw token.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}
