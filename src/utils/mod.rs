//! Shared helpers used by the analyses.

mod bitset;
mod dot;

pub use bitset::BitSet;
pub use dot::escape_dot;
