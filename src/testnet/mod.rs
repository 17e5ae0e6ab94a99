//! Test helpers
//!
//! Temporary logs and nodes with an adjustable clock, throwaway keys, and
//! quickly mined chains.

pub mod test_utils;

pub use test_utils::*;
