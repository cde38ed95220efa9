//! API client adapters.
//!
//! The crawler consumes one capability: enumerate the resources of a type
//! under a parent. Adapters return a lazy, finite, single-pass payload
//! stream; pagination, authentication and quota handling live inside the
//! adapter. Enumeration failures are typed so the crawler can treat them
//! as recoverable per-work-item errors.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ApiError;
use crate::resource::Resource;

mod fixture;
mod rest;

pub use fixture::FixtureClient;
pub use rest::RestApiClient;

/// Lazy sequence of raw payloads for one (parent, type) enumeration.
pub type PayloadStream = BoxStream<'static, Result<serde_json::Value, ApiError>>;

/// Capability to enumerate resources of a type under a parent.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn enumerate(&self, type_name: &str, parent: &Resource) -> Result<PayloadStream, ApiError>;
}
