//! # Storage and Persistence
//!
//! This module provides database connectivity and the single-snapshot state
//! store the rest of the control plane is built on.

pub mod memory;
pub mod migrations;
pub mod pool;
pub mod state_store;

pub use memory::InMemoryStateStore;
pub use pool::{create_pool, DbPool};
pub use state_store::{SqlxStateStore, StateStore};
