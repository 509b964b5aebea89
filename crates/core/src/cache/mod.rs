//! SQLite-backed response cache.
//!
//! This module provides the persistent, origin-scoped key-value store the
//! gateway owns, using SQLite with async access via tokio-rusqlite. It supports:
//!
//! - Named caches (precache and runtime) keyed by request URL
//! - Revision tracking for precached entries
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod connection;
pub mod hash;
pub mod migrations;
pub mod responses;
pub mod store;

pub use crate::Error;

pub use connection::CacheDb;
pub use responses::CachedResponse;
pub use store::CacheStore;
