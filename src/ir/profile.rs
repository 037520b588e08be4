//! Provenance of branch probabilities and loop frequencies.

use strum::{Display, EnumIter};

/// Where a probability or frequency estimate came from.
///
/// The variants are ordered by how much the estimate can be trusted:
/// `Unknown < Injected < Profiled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileSource {
    /// No information, the probability is a default guess.
    #[default]
    Unknown,
    /// The probability was injected by the compiler or an intrinsic, e.g. for slow paths.
    Injected,
    /// The probability was measured by the profiling interpreter.
    Profiled,
}

impl ProfileSource {
    /// Combines two sources into the source of a value derived from both.
    ///
    /// Real profiling data wins over injected data, which wins over no data. The operation is
    /// commutative and associative with [`ProfileSource::Unknown`] as identity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flowscope::ir::ProfileSource;
    ///
    /// assert_eq!(
    ///     ProfileSource::Injected.combine(ProfileSource::Profiled),
    ///     ProfileSource::Profiled
    /// );
    /// assert_eq!(
    ///     ProfileSource::Unknown.combine(ProfileSource::Injected),
    ///     ProfileSource::Injected
    /// );
    /// ```
    #[must_use]
    pub fn combine(self, other: ProfileSource) -> ProfileSource {
        self.max(other)
    }

    /// Returns `true` if the value is backed by profiling or injected data.
    #[must_use]
    pub fn is_trusted(self) -> bool {
        matches!(self, ProfileSource::Profiled | ProfileSource::Injected)
    }
}

/// The local frequency of a loop together with its provenance.
///
/// A local loop frequency is the expected number of header executions per entry into the
/// loop, i.e. the loop considered in isolation from the code around it. It is at least 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopFrequencyData {
    loop_frequency: f64,
    profile_source: ProfileSource,
}

impl LoopFrequencyData {
    /// Creates new loop frequency data.
    #[must_use]
    pub fn new(loop_frequency: f64, profile_source: ProfileSource) -> Self {
        debug_assert!(
            loop_frequency >= 1.0,
            "loop frequency {loop_frequency} must be at least 1"
        );
        Self {
            loop_frequency,
            profile_source,
        }
    }

    /// The expected number of header executions per loop entry.
    #[must_use]
    pub fn loop_frequency(&self) -> f64 {
        self.loop_frequency
    }

    /// Where the estimate came from.
    #[must_use]
    pub fn profile_source(&self) -> ProfileSource {
        self.profile_source
    }

    /// Returns a copy with the frequency lowered by `decrement`, but never below 1.
    ///
    /// Used by loop transformations that peel or unroll iterations off a loop.
    #[must_use]
    pub fn decrement_frequency(&self, decrement: f64) -> Self {
        debug_assert!(decrement >= 0.0, "negative decrement {decrement}");
        Self::new((self.loop_frequency - decrement).max(1.0), self.profile_source)
    }

    /// Returns a copy with the frequency divided by `factor`, but never below 1.
    #[must_use]
    pub fn scale_frequency(&self, factor: f64) -> Self {
        debug_assert!(factor > 0.0, "non positive scale factor {factor}");
        Self::new((self.loop_frequency / factor).max(1.0), self.profile_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_combine_is_commutative_and_associative() {
        for a in ProfileSource::iter() {
            assert_eq!(a.combine(ProfileSource::Unknown), a);
            for b in ProfileSource::iter() {
                assert_eq!(a.combine(b), b.combine(a));
                for c in ProfileSource::iter() {
                    assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
                }
            }
        }
    }

    #[test]
    fn test_combine_prefers_profiled() {
        assert_eq!(
            ProfileSource::Profiled.combine(ProfileSource::Unknown),
            ProfileSource::Profiled
        );
        assert_eq!(
            ProfileSource::Injected.combine(ProfileSource::Unknown),
            ProfileSource::Injected
        );
        assert!(ProfileSource::Injected.is_trusted());
        assert!(!ProfileSource::Unknown.is_trusted());
    }

    #[test]
    fn test_profile_source_display() {
        assert_eq!(ProfileSource::Profiled.to_string(), "PROFILED");
        assert_eq!(ProfileSource::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_loop_frequency_data_updates() {
        let data = LoopFrequencyData::new(10.0, ProfileSource::Profiled);
        let peeled = data.decrement_frequency(3.0);
        assert!((peeled.loop_frequency() - 7.0).abs() < 1e-12);
        assert_eq!(peeled.profile_source(), ProfileSource::Profiled);

        let floor = data.decrement_frequency(100.0);
        assert!((floor.loop_frequency() - 1.0).abs() < 1e-12);

        let unrolled = data.scale_frequency(2.0);
        assert!((unrolled.loop_frequency() - 5.0).abs() < 1e-12);
    }
}
