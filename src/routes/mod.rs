//! Route builders.

pub mod entity;
pub use entity::entity_routes;
