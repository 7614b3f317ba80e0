//! Skyforge gateway — library crate for the infrastructure command and
//! observation server.
//!
//! Re-exports all modules so the binary (`main.rs`) and external crates
//! (e.g. `sf-e2e-tests`) can access internal types like `AppState`,
//! `build_router`, `GatewayService` and the store traits.

pub mod classifier;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod observer;
pub mod recommendations;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
