//! Client side of the precache gateway.
//!
//! This crate provides the network abstraction, routing table, caching
//! strategies, precache controller, and the gateway/registration lifecycle
//! shared by the server.

pub mod fetch;
pub mod gateway;
pub mod precache;
pub mod registration;
pub mod routing;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use fetch::{FetchConfig, FetchResponse, HttpNetwork, Method, Network, Request};
pub use gateway::{Gateway, GatewayResponse, LifecycleState, ResponseSource};
pub use precache::{AssetFailure, InstallReport, PrecacheController};
pub use registration::{PageClient, RegisterOutcome, Registration, RegistrationOptions};
pub use routing::{Route, RouteTable};
pub use strategy::Strategy;
