//! Storage backend contract: the primitives the CRUD layer issues per entity.

pub mod memory;

use crate::error::BackendError;
use crate::mutation::MutationPayload;
use crate::query::{Filter, QuerySpec};
use async_trait::async_trait;
use serde_json::Value;

pub use memory::{BackendOp, MemoryBackend};

/// Keyed by entity name. `update`/`delete` filters are expected to address a single record.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn count(&self, entity: &str, filter: &Filter) -> Result<u64, BackendError>;

    async fn find_many(&self, entity: &str, query: &QuerySpec) -> Result<Vec<Value>, BackendError>;

    async fn find_first(&self, entity: &str, query: &QuerySpec) -> Result<Option<Value>, BackendError>;

    async fn create(&self, entity: &str, payload: &MutationPayload) -> Result<Value, BackendError>;

    async fn update(&self, entity: &str, filter: &Filter, payload: &MutationPayload) -> Result<Value, BackendError>;

    async fn delete(&self, entity: &str, filter: &Filter) -> Result<Value, BackendError>;
}
