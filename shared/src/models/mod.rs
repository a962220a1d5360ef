//! Domain models for the inventory accounting core

mod inventory;
mod order;
mod order_return;

pub use inventory::*;
pub use order::*;
pub use order_return::*;
