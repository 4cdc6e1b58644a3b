//! The connector's error taxonomy and error-domain registration.
//!
//! Services report failures to remote callers through a fixed set of error
//! kinds, each mapped 1:1 to a stable wire-level error name namespaced under
//! the service identity. The mapping is registered with the transport once,
//! at initialise time.

use thiserror::Error;

use crossbar_bus::{BusError, BusTransport, ErrorEntry, WireError};

/// Application-level error kinds exposed to remote callers.
///
/// The set is fixed: every kind maps to exactly one stable wire name, and
/// handlers translate their failures into one of these before replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed object path.
    BadPath,
    /// The addressed object does not exist.
    ObjectNotFound,
    /// Malformed filter or search expression.
    BadQuery,
    /// Generic handler failure.
    OperationFailed,
    /// The operation produced an unusable result.
    BadResult,
    /// The call named an interface the object does not expose.
    UnknownInterface,
    /// The call named a property the interface does not declare.
    UnknownProperty,
    /// The addressed device is gone.
    DeviceNotFound,
    /// The peer died mid-operation.
    Died,
    /// The operation was cancelled.
    Cancelled,
    /// The operation is not supported by this object.
    NotSupported,
    /// The object disappeared while the operation was in flight.
    LostObject,
    /// Unacceptable media type.
    BadMime,
    /// The remote host failed.
    HostFailed,
    /// Input/output failure.
    Io,
}

impl ErrorKind {
    /// Every kind, in stable code order.
    pub const ALL: [Self; 15] = [
        Self::BadPath,
        Self::ObjectNotFound,
        Self::BadQuery,
        Self::OperationFailed,
        Self::BadResult,
        Self::UnknownInterface,
        Self::UnknownProperty,
        Self::DeviceNotFound,
        Self::Died,
        Self::Cancelled,
        Self::NotSupported,
        Self::LostObject,
        Self::BadMime,
        Self::HostFailed,
        Self::Io,
    ];

    /// The kind's numeric code in the error domain.
    #[must_use]
    pub const fn code(self) -> u32 {
        // Position in ALL; codes are stable because ALL is append-only.
        match self {
            Self::BadPath => 0,
            Self::ObjectNotFound => 1,
            Self::BadQuery => 2,
            Self::OperationFailed => 3,
            Self::BadResult => 4,
            Self::UnknownInterface => 5,
            Self::UnknownProperty => 6,
            Self::DeviceNotFound => 7,
            Self::Died => 8,
            Self::Cancelled => 9,
            Self::NotSupported => 10,
            Self::LostObject => 11,
            Self::BadMime => 12,
            Self::HostFailed => 13,
            Self::Io => 14,
        }
    }

    /// The unnamespaced wire suffix for this kind.
    #[must_use]
    pub const fn wire_suffix(self) -> &'static str {
        match self {
            Self::BadPath => "BadPath",
            Self::ObjectNotFound => "ObjectNotFound",
            Self::BadQuery => "BadQuery",
            Self::OperationFailed => "OperationFailed",
            Self::BadResult => "BadResult",
            Self::UnknownInterface => "UnknownInterface",
            Self::UnknownProperty => "UnknownProperty",
            Self::DeviceNotFound => "DeviceNotFound",
            Self::Died => "Died",
            Self::Cancelled => "Cancelled",
            Self::NotSupported => "NotSupported",
            Self::LostObject => "LostObject",
            Self::BadMime => "BadMime",
            Self::HostFailed => "HostFailed",
            Self::Io => "IO",
        }
    }
}

/// Errors raised while validating an error-domain token.
///
/// An invalid token indicates a build-time schema mismatch, so callers treat
/// these as fatal configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The token is empty.
    #[error("error domain token is empty")]
    Empty,

    /// The token is not a well-formed dotted identifier.
    #[error("error domain token '{token}' is malformed: {reason}")]
    Malformed {
        /// The rejected token.
        token: String,
        /// What rule the token broke.
        reason: &'static str,
    },
}

/// A validated service identity under which error names are namespaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDomain {
    service: String,
}

impl ErrorDomain {
    /// Validates and wraps a service identity token.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError`] when the token is empty or not a dotted
    /// identifier of `[A-Za-z0-9_-]` elements with no element starting with
    /// a digit.
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let service = raw.into();
        if service.is_empty() {
            return Err(DomainError::Empty);
        }
        for element in service.split('.') {
            if element.is_empty() {
                return Err(DomainError::Malformed {
                    token: service,
                    reason: "empty element",
                });
            }
            if element.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(DomainError::Malformed {
                    token: service,
                    reason: "element starts with a digit",
                });
            }
            if !element
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(DomainError::Malformed {
                    token: service,
                    reason: "element contains an invalid character",
                });
            }
        }
        Ok(Self { service })
    }

    /// The service identity string.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The stable, namespaced wire name for `kind`.
    #[must_use]
    pub fn name(&self, kind: ErrorKind) -> String {
        format!("{}.{}", self.service, kind.wire_suffix())
    }

    /// Builds the wire error payload for a reply.
    #[must_use]
    pub fn wire_error(&self, kind: ErrorKind, message: impl Into<String>) -> WireError {
        WireError {
            name: self.name(kind),
            message: message.into(),
        }
    }
}

/// Registers the full taxonomy under `domain` in the transport's process-wide
/// error-name table. Each pair is registered exactly once; registration order
/// is not externally observable.
///
/// # Errors
///
/// Returns [`BusError`] when the transport rejects the domain.
pub fn register_error_domain(
    transport: &dyn BusTransport,
    domain: &ErrorDomain,
) -> Result<(), BusError> {
    let entries: Vec<ErrorEntry> = ErrorKind::ALL
        .iter()
        .map(|kind| ErrorEntry {
            code: kind.code(),
            name: domain.name(*kind),
        })
        .collect();
    transport.register_error_domain(domain.service(), &entries)
}
