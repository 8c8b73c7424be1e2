//! Common test utilities for wiki-fetch integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod surface;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use surface::*;
