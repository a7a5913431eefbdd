//! faceidd: face identification service.
//!
//! Enrollment (single and bulk), 1:N identification and gallery management
//! on top of `faceid-core`, exposed over HTTP.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod engine;
pub mod enroll;
pub mod identify;
pub mod store;

#[cfg(test)]
#[path = "../tests/support/mod.rs"]
mod support;
#[cfg(test)]
pub(crate) mod testing;
