//! Core types and shared functionality for the precache gateway.
//!
//! This crate provides:
//! - Response cache with SQLite backend
//! - Site manifest model
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod manifest;

pub use cache::{CacheDb, CacheStore, CachedResponse};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use manifest::{
    CacheableResponse, ManifestEntry, PrecacheEntry, PrecacheOptions, RouteDecl, SiteManifest, StrategyKind,
    StrategyOptions,
};
