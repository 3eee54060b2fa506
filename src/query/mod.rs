//! Query specification and the read-path builder.

pub mod filter;
pub mod params;
mod builder;
pub use builder::*;
pub use filter::*;
pub use params::*;
