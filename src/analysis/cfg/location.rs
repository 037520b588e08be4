//! Sets of killed memory locations.

use std::fmt;

use crate::ir::LocationIdentity;

/// A small set of mutable memory locations, collapsible to "any location".
///
/// The set is tuned for the common case of zero to four entries: the first location is kept
/// inline and further ones go to a short list that is searched linearly. Once
/// [`LocationIdentity::Any`] is added the set forgets its entries, reports [`is_any`](Self::is_any)
/// and answers every [`contains`](Self::contains) with `true`.
///
/// Immutable locations are never stored since nothing can kill them.
///
/// # Examples
///
/// ```rust
/// use flowscope::{analysis::LocationSet, ir::LocationIdentity};
///
/// let x = LocationIdentity::mutable("x");
/// let y = LocationIdentity::mutable("y");
///
/// let mut set = LocationSet::new();
/// set.add(x.clone());
/// assert!(set.contains(&x));
/// assert!(!set.contains(&y));
///
/// set.add(LocationIdentity::any());
/// assert!(set.is_any());
/// assert!(set.contains(&y));
/// ```
#[derive(Clone, Default, PartialEq)]
pub struct LocationSet {
    first: Option<LocationIdentity>,
    rest: Vec<LocationIdentity>,
}

impl LocationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the set stands for all of memory.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.first.as_ref().is_some_and(LocationIdentity::is_any)
    }

    /// Returns `true` if no location was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Adds a location.
    ///
    /// Adding [`LocationIdentity::Any`] collapses the set. Adding anything to a collapsed set,
    /// adding an immutable location, or adding a location twice leaves the set unchanged.
    pub fn add(&mut self, location: LocationIdentity) {
        if self.is_any() {
            return;
        }
        if location.is_any() {
            self.first = Some(location);
            self.rest = Vec::new();
            return;
        }
        if location.is_immutable() {
            return;
        }
        match &self.first {
            None => self.first = Some(location),
            Some(first) if *first == location => {}
            Some(_) => {
                if !self.rest.contains(&location) {
                    self.rest.push(location);
                }
            }
        }
    }

    /// Adds every location of `other`, stopping as soon as this set collapses to any.
    pub fn add_all(&mut self, other: &LocationSet) {
        for location in other.iter() {
            if self.is_any() {
                return;
            }
            self.add(location.clone());
        }
    }

    /// Returns `true` if `location` may be killed.
    ///
    /// Intended for single, mutable locations. An immutable location is contained only in a
    /// collapsed set.
    #[must_use]
    pub fn contains(&self, location: &LocationIdentity) -> bool {
        match &self.first {
            None => false,
            Some(first) if first.is_any() || first == location => true,
            Some(_) => self.rest.contains(location),
        }
    }

    /// Iterates over the stored locations.
    ///
    /// A collapsed set yields exactly [`LocationIdentity::Any`].
    pub fn iter(&self) -> impl Iterator<Item = &LocationIdentity> + '_ {
        self.first.iter().chain(self.rest.iter())
    }

    /// Number of stored locations. A collapsed set has length 1.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.first.is_some()) + self.rest.len()
    }

    /// Copies the stored locations into a vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<LocationIdentity> {
        self.iter().cloned().collect()
    }
}

impl FromIterator<LocationIdentity> for LocationSet {
    fn from_iter<I: IntoIterator<Item = LocationIdentity>>(iter: I) -> Self {
        let mut set = LocationSet::new();
        for location in iter {
            set.add(location);
        }
        set
    }
}

impl fmt::Debug for LocationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for LocationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("ANY");
        }
        f.write_str("[")?;
        for (index, location) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{location}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(name: &str) -> LocationIdentity {
        LocationIdentity::mutable(name)
    }

    #[test]
    fn test_empty_set() {
        let set = LocationSet::new();
        assert!(set.is_empty());
        assert!(!set.is_any());
        assert!(!set.contains(&loc("a")));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_add_deduplicates() {
        let mut set = LocationSet::new();
        set.add(loc("a"));
        set.add(loc("b"));
        set.add(loc("a"));
        set.add(loc("b"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_vec(), vec![loc("a"), loc("b")]);
    }

    #[test]
    fn test_add_any_collapses() {
        let mut set = LocationSet::new();
        set.add(loc("a"));
        set.add(loc("b"));
        set.add(LocationIdentity::any());
        assert!(set.is_any());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&loc("zzz")));

        set.add(loc("c"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.to_string(), "ANY");
    }

    #[test]
    fn test_immutable_locations_ignored() {
        let mut set = LocationSet::new();
        let frozen = LocationIdentity::immutable("final");
        set.add(frozen.clone());
        assert!(set.is_empty());
        assert!(!set.contains(&frozen));
    }

    #[test]
    fn test_add_all_stops_at_any() {
        let mut other = LocationSet::new();
        other.add(loc("x"));
        other.add(loc("y"));

        let mut set = LocationSet::new();
        set.add(loc("y"));
        set.add_all(&other);
        assert_eq!(set.to_vec(), vec![loc("y"), loc("x")]);

        let mut any = LocationSet::new();
        any.add(LocationIdentity::any());
        set.add_all(&any);
        assert!(set.is_any());
    }

    #[test]
    fn test_display() {
        let set: LocationSet = [loc("a"), loc("b")].into_iter().collect();
        assert_eq!(set.to_string(), "[a, b]");
    }
}
