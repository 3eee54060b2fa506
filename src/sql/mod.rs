//! PostgreSQL backend: identifiers from the model only, values as parameters.

mod backend;
mod builder;
pub mod params;

pub use backend::PgBackend;
pub use builder::{quoted, JoinTable, QueryBuf, SqlCompiler};
pub use params::{pg_cast, PgBindValue};
