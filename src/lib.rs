//! relcrud: metadata-driven generic CRUD over a relational schema.
//!
//! Entity relations are inferred from field naming conventions; list/get/create/update/
//! delete/updateMetas run through one generic facade per entity, on PostgreSQL or in memory.

pub mod backend;
pub mod case;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod mutation;
pub mod options;
pub mod query;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;

pub use backend::{MemoryBackend, StorageBackend};
pub use error::{AppError, BackendError, ConfigError};
pub use facade::{CrudFacade, CrudOperation, CrudOverrides, CrudRequest, Operation};
pub use options::CrudOptions;
pub use query::{QueryParams, QuerySpec};
pub use response::Envelope;
pub use routes::entity_routes;
pub use schema::{build, infer, ModelDefinition, ModelMap};
pub use service::{CrudService, ListResult};
pub use settings::Settings;
pub use sql::PgBackend;
pub use state::{AppState, FacadeRegistry};
