//! mirrorpost domain crate
//!
//! This crate contains the core domain logic following hexagonal architecture:
//! - `model`: Domain entities and value objects
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `readiness`: Readiness gates the sync engine joins over before ticking
//! - `usecases`: Normalization, candidate filtering, and the sync engine

pub mod model;
pub mod ports;
pub mod readiness;
pub mod usecases;

pub use model::*;
pub use ports::*;
pub use readiness::ReadyGate;
