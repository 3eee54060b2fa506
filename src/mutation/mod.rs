//! Write-path builder: payload sanitization, relation directives, many-to-many reconciliation.

pub mod diff;
pub mod payload;
pub use diff::*;
pub use payload::*;
