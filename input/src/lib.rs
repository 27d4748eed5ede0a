//! The input worker: converts, serves, or pushes one media stream.
//!
//! Split into small, independently testable pieces: the packet source
//! boundary ([`source`]), the sidecar header ([`header`]), the demand cache
//! ([`cache`]), the shared-memory-backed page writer ([`page_store`]), the
//! process supervisor ([`supervisor`]), and the three [`modes`].

pub mod cache;
pub mod cli;
pub mod header;
pub mod modes;
pub mod page_store;
pub mod source;
pub mod supervisor;
