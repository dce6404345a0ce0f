//! Provider boundary.
//!
//! This module contains:
//! - [`Provider`]: the async trait every cloud backend implements
//! - [`ResourceAdapter`]: retries, idempotence and replacement ordering
//! - [`HttpProvider`]: a JSON gateway client
//! - [`MemoryProvider`]: an in-process simulated cloud
//! - resource schemas

mod adapter;
mod http;
mod memory;
mod schema;
mod traits;

pub use adapter::{OperationResult, ResourceAdapter, RetiredResource, RetryPolicy};
pub use http::{HttpProvider, DEFAULT_TIMEOUT_SECS};
pub use memory::{MemoryProvider, OutputFabricator, ProviderCall, ProviderOperation};
pub use schema::{ResourceSchema, SchemaRegistry, SchemaSource};
pub use traits::{
    CreateRequest, DeleteRequest, Provider, ProviderResponse, ProviderResult, UpdateRequest,
};
