//! HTTP handlers for the POS inventory core

pub mod health;
pub mod inventory;
pub mod orders;

pub use health::*;
pub use inventory::*;
pub use orders::*;
