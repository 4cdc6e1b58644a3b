//! Validated object paths and bus names.
//!
//! Both types validate at construction so every other layer can treat a held
//! value as well-formed. The grammar follows the transport's rules: paths are
//! absolute with `[A-Za-z0-9_]` segments; names are dot-separated elements of
//! `[A-Za-z0-9_-]` where no element starts with a digit.

use std::fmt;

use thiserror::Error;

/// Errors raised while validating an object path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path is empty.
    #[error("object path is empty")]
    Empty,

    /// The path does not start with `/`.
    #[error("object path '{path}' is not absolute")]
    NotAbsolute {
        /// The rejected input.
        path: String,
    },

    /// The path contains an empty segment (doubled or trailing slash).
    #[error("object path '{path}' contains an empty segment")]
    EmptySegment {
        /// The rejected input.
        path: String,
    },

    /// A segment contains a character outside `[A-Za-z0-9_]`.
    #[error("object path '{path}' contains invalid character '{character}'")]
    InvalidCharacter {
        /// The rejected input.
        path: String,
        /// The first offending character.
        character: char,
    },
}

/// Hierarchical string identifying a remote-invocable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validates and wraps an object path.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] when the input is empty, relative, contains an
    /// empty segment, or uses characters outside the path alphabet.
    pub fn new(raw: impl Into<String>) -> Result<Self, PathError> {
        let path = raw.into();
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        if !path.starts_with('/') {
            return Err(PathError::NotAbsolute { path });
        }
        if path == "/" {
            return Ok(Self(path));
        }
        let segments = path.split('/').skip(1);
        for segment in segments {
            if segment.is_empty() {
                return Err(PathError::EmptySegment { path });
            }
            if let Some(character) = segment
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
            {
                return Err(PathError::InvalidCharacter { path, character });
            }
        }
        Ok(Self(path))
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the root path `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Returns `true` when `self` equals `prefix` or sits below it.
    ///
    /// The match is at segment boundaries: `/a/bc` is not under `/a/b`.
    #[must_use]
    pub fn is_under(&self, prefix: &Self) -> bool {
        if prefix.is_root() {
            return true;
        }
        match self.0.strip_prefix(prefix.0.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }

    /// Returns the first path segment below `prefix`, or `None` when `self`
    /// is `prefix` itself or does not sit under it.
    #[must_use]
    pub fn node_under(&self, prefix: &Self) -> Option<&str> {
        if !self.is_under(prefix) {
            return None;
        }
        let rest = if prefix.is_root() {
            self.0.strip_prefix('/')?
        } else {
            self.0.strip_prefix(prefix.0.as_str())?.strip_prefix('/')?
        };
        match rest.split('/').next() {
            Some("") | None => None,
            Some(node) => Some(node),
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while validating a bus name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// The name is empty.
    #[error("bus name is empty")]
    Empty,

    /// The name has fewer than two dot-separated elements.
    #[error("bus name '{name}' needs at least two elements")]
    TooFewElements {
        /// The rejected input.
        name: String,
    },

    /// An element is empty (doubled, leading, or trailing dot).
    #[error("bus name '{name}' contains an empty element")]
    EmptyElement {
        /// The rejected input.
        name: String,
    },

    /// An element starts with a digit.
    #[error("bus name '{name}' has an element starting with a digit")]
    LeadingDigit {
        /// The rejected input.
        name: String,
    },

    /// An element contains a character outside `[A-Za-z0-9_-]`.
    #[error("bus name '{name}' contains invalid character '{character}'")]
    InvalidCharacter {
        /// The rejected input.
        name: String,
        /// The first offending character.
        character: char,
    },
}

/// Well-known name identifying a peer on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusName(String);

impl BusName {
    /// Validates and wraps a bus name.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] when the input is empty, has fewer than two
    /// elements, or any element is empty, starts with a digit, or uses
    /// characters outside the name alphabet.
    pub fn new(raw: impl Into<String>) -> Result<Self, NameError> {
        let name = raw.into();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        let elements: Vec<&str> = name.split('.').collect();
        if elements.len() < 2 {
            return Err(NameError::TooFewElements { name });
        }
        for element in &elements {
            if element.is_empty() {
                return Err(NameError::EmptyElement { name });
            }
            if element.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(NameError::LeadingDigit { name });
            }
            if let Some(character) = element
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
            {
                return Err(NameError::InvalidCharacter { name, character });
            }
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
