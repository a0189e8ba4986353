//! Vireo Core
//!
//! Shared utilities for the Vireo asset runtime: allocation helpers,
//! logging setup and profiling hooks.

pub mod alloc;
pub mod logging;
pub mod profiling;
