//! Shared program graph factories for unit tests.
//!
//! Every factory returns the graph together with the ids of the nodes tests want to look at.
//! The expected block numbering is noted on each factory.

mod graphs;

pub use graphs::*;
