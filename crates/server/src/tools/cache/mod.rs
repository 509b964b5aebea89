//! Cache-related MCP tools.
//!
//! Cache names accept the aliases `precache` and `runtime` for the active
//! version's caches.

pub mod list;
pub mod purge;

pub use list::{CacheListParams, list_impl};
pub use purge::{CachePurgeParams, purge_impl};
