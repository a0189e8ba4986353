//! Allocation and collection types for Vireo.
//!
//! This module provides:
//! - The AHash-backed `HashMap`
//! - SparseSet data structure for generational indices

pub mod sparse_set;

pub use ahash::AHashMap as HashMap;
