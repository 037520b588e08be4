//! Memory location identities.
//!
//! A [`LocationIdentity`] names a class of memory that an instruction may read or overwrite.
//! Two instructions with different identities never alias, which lets the scheduler move
//! memory reads across writes without a full alias analysis.

use std::{fmt, sync::Arc};

/// An abstract token for a class of memory.
///
/// # Examples
///
/// ```rust
/// use flowscope::ir::LocationIdentity;
///
/// let field = LocationIdentity::mutable("Point.x");
/// assert!(field.is_single());
/// assert!(field.is_mutable());
///
/// assert!(LocationIdentity::any().is_any());
/// assert!(LocationIdentity::immutable("String.length").is_immutable());
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum LocationIdentity {
    /// Any location at all. Killing this invalidates every memory read.
    Any,
    /// A named location.
    Named {
        /// The name of the location, e.g. a field or array kind.
        name: Arc<str>,
        /// Immutable locations are never written after initialization and thus never killed.
        immutable: bool,
    },
}

impl LocationIdentity {
    /// Returns the location standing for all memory.
    #[must_use]
    pub const fn any() -> Self {
        LocationIdentity::Any
    }

    /// Creates a named location that may be overwritten.
    #[must_use]
    pub fn mutable(name: &str) -> Self {
        LocationIdentity::Named {
            name: Arc::from(name),
            immutable: false,
        }
    }

    /// Creates a named location that is never overwritten.
    #[must_use]
    pub fn immutable(name: &str) -> Self {
        LocationIdentity::Named {
            name: Arc::from(name),
            immutable: true,
        }
    }

    /// Returns `true` for the location standing for all memory.
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, LocationIdentity::Any)
    }

    /// Returns `true` if this identity denotes one specific class of memory.
    #[must_use]
    pub fn is_single(&self) -> bool {
        !self.is_any()
    }

    /// Returns `true` if the location is never written.
    #[must_use]
    pub fn is_immutable(&self) -> bool {
        matches!(self, LocationIdentity::Named { immutable: true, .. })
    }

    /// Returns `true` if the location may be written.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        !self.is_immutable()
    }
}

impl fmt::Debug for LocationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for LocationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationIdentity::Any => f.write_str("ANY_LOCATION"),
            LocationIdentity::Named {
                name,
                immutable: false,
            } => f.write_str(name),
            LocationIdentity::Named {
                name,
                immutable: true,
            } => write!(f, "{name}(immutable)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_identity_flags() {
        let any = LocationIdentity::any();
        assert!(any.is_any());
        assert!(!any.is_single());
        assert!(any.is_mutable());

        let frozen = LocationIdentity::immutable("array.length");
        assert!(frozen.is_single());
        assert!(frozen.is_immutable());
        assert!(!frozen.is_mutable());
    }

    #[test]
    fn test_location_identity_equality() {
        assert_eq!(LocationIdentity::mutable("x"), LocationIdentity::mutable("x"));
        assert_ne!(LocationIdentity::mutable("x"), LocationIdentity::mutable("y"));
        assert_ne!(LocationIdentity::mutable("x"), LocationIdentity::immutable("x"));
    }

    #[test]
    fn test_location_identity_display() {
        assert_eq!(LocationIdentity::any().to_string(), "ANY_LOCATION");
        assert_eq!(LocationIdentity::mutable("Point.x").to_string(), "Point.x");
        assert_eq!(
            LocationIdentity::immutable("Class.hub").to_string(),
            "Class.hub(immutable)"
        );
    }
}
