//! Provider capability interface for the Skyforge gateway.
//!
//! `Provider` trait with `apply_operation`/`observe`. Implementations:
//! - `SimulatedProvider` — in-process control plane per provider class
//! - `HttpProvider` — external control plane over HTTP
//! - `MockProvider` — scripted failures and call recording (in `mock.rs`)

pub mod error;
pub mod http;
pub mod mock;
pub mod provider;
pub mod registry;
pub mod simulated;

pub use error::{ProviderError, ProviderResult};
pub use http::{HttpProvider, HttpProviderConfig};
pub use mock::MockProvider;
pub use provider::{Ack, Provider};
pub use registry::ProviderRegistry;
pub use simulated::SimulatedProvider;
