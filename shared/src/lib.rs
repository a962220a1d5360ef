//! Shared types and rules for the restaurant POS inventory core
//!
//! This crate contains the domain types and pure accounting rules shared
//! between the backend service and the return-entry UI (via WASM). Nothing
//! in here performs I/O.

pub mod models;
pub mod rollup;
pub mod types;
pub mod validation;

pub use models::*;
pub use rollup::*;
pub use types::*;
pub use validation::*;
