//! Interface schema documents for the crossbar connector.
//!
//! A service hands the connector two schema documents at initialise time: one
//! describing the root object's interfaces and one describing the interfaces
//! exposed by dynamically published server objects. Documents are JSON and are
//! parsed once into an ordered [`InterfaceCatalog`]; the catalog is immutable
//! for the life of the connector and every dispatch-table index refers to a
//! position within it.
//!
//! # Example
//!
//! ```
//! use crossbar_schema::{InterfaceCatalog, NodeDocument};
//!
//! let document = NodeDocument::parse(
//!     r#"{"interfaces":[
//!         {"name":"com.example.Manager","methods":[{"name":"GetVersion"}]},
//!         {"name":"com.example.Search","methods":[{"name":"Query"}]}
//!     ]}"#,
//! )
//! .expect("well-formed document");
//!
//! let catalog = InterfaceCatalog::from_document(document);
//! assert_eq!(catalog.len(), 2);
//! assert_eq!(catalog.position("com.example.Search"), Some(1));
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document is not valid JSON or does not match the schema shape.
    #[error("malformed schema document: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The document declares no interfaces.
    #[error("schema document declares no interfaces")]
    NoInterfaces,

    /// An interface entry has an empty name.
    #[error("interface at position {index} has an empty name")]
    EmptyInterfaceName {
        /// Zero-based position of the offending entry.
        index: usize,
    },

    /// Two interface entries share the same name.
    #[error("duplicate interface name '{name}'")]
    DuplicateInterface {
        /// The repeated interface name.
        name: String,
    },

    /// A method entry has an empty name.
    #[error("interface '{interface}' declares a method with an empty name")]
    EmptyMethodName {
        /// Interface containing the offending method.
        interface: String,
    },
}

/// A single method argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSchema {
    /// Argument name.
    pub name: String,
    /// Optional wire type signature; interpretation belongs to the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A method exposed by an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSchema {
    /// Method name.
    pub name: String,
    /// Declared arguments, in call order.
    #[serde(default)]
    pub args: Vec<ArgSchema>,
}

/// A signal emitted by an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSchema {
    /// Signal name.
    pub name: String,
    /// Declared payload arguments.
    #[serde(default)]
    pub args: Vec<ArgSchema>,
}

/// A named group of methods and signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSchema {
    /// Fully qualified interface name.
    pub name: String,
    /// Methods callable on the interface.
    #[serde(default)]
    pub methods: Vec<MethodSchema>,
    /// Signals the interface may emit.
    #[serde(default)]
    pub signals: Vec<SignalSchema>,
}

impl InterfaceSchema {
    /// Looks up a method by name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodSchema> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A parsed schema document: the ordered interface list for one node shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDocument {
    /// Interfaces in declaration order. Order is load-bearing: dispatch-table
    /// indices refer to positions in this list.
    pub interfaces: Vec<InterfaceSchema>,
}

impl NodeDocument {
    /// Parses and validates a JSON schema document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the JSON is malformed, the interface list
    /// is empty, or any interface or method name is empty or duplicated.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let document: Self = serde_json::from_str(input).map_err(SchemaError::Malformed)?;
        document.validate()?;
        Ok(document)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.interfaces.is_empty() {
            return Err(SchemaError::NoInterfaces);
        }
        let mut seen = Vec::with_capacity(self.interfaces.len());
        for (index, interface) in self.interfaces.iter().enumerate() {
            if interface.name.is_empty() {
                return Err(SchemaError::EmptyInterfaceName { index });
            }
            if seen.contains(&interface.name.as_str()) {
                return Err(SchemaError::DuplicateInterface {
                    name: interface.name.clone(),
                });
            }
            seen.push(interface.name.as_str());
            if interface.methods.iter().any(|m| m.name.is_empty()) {
                return Err(SchemaError::EmptyMethodName {
                    interface: interface.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Immutable, ordered interface table built from a parsed document.
///
/// Interfaces are reference-counted so introspection results can share them
/// with transport-side caches without copying.
#[derive(Debug, Clone)]
pub struct InterfaceCatalog {
    interfaces: Vec<Arc<InterfaceSchema>>,
}

impl InterfaceCatalog {
    /// Builds a catalog from a validated document, preserving order.
    #[must_use]
    pub fn from_document(document: NodeDocument) -> Self {
        Self {
            interfaces: document.interfaces.into_iter().map(Arc::new).collect(),
        }
    }

    /// Returns the interface at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<InterfaceSchema>> {
        self.interfaces.get(index)
    }

    /// Returns the position of the interface named `name`.
    ///
    /// A miss is an explicit outcome here; callers must not fall through to
    /// an index equal to the catalog length.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.interfaces.iter().position(|i| i.name == name)
    }

    /// Number of interfaces in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    /// Returns `true` when the catalog holds no interfaces.
    ///
    /// Unreachable through [`NodeDocument::parse`], which rejects empty
    /// interface lists, but kept for direct constructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Iterates the interfaces in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<InterfaceSchema>> {
        self.interfaces.iter()
    }
}
