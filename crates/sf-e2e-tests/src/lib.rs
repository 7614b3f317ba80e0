//! End-to-end tests for the Skyforge gateway live under `tests/`.
//!
//! They drive the full stack (router, service, executor, providers, store)
//! through HTTP requests against in-memory state.
