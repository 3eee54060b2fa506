//! CrudService: generic CRUD orchestration over a storage backend.

mod crud;
pub use crud::{CrudService, ListResult};
