//! Referent enumeration
pub mod referents;
