//! Shared data structures
pub mod intset;
