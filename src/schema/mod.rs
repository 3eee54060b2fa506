pub mod types;
pub mod resolved;
pub mod metadata;
pub mod inference;
pub mod loader;
pub mod validator;

pub use types::*;
pub use resolved::*;
pub use metadata::build;
pub use inference::{infer, infer_with, EnglishInflector, Inflector};
pub use loader::*;
pub use validator::*;
