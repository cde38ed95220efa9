//! In-memory API client for tests and offline runs.
//!
//! Payloads are keyed by (parent key, type name); enumeration failures can
//! be injected per pair to exercise the crawler's recoverable-error path.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::StreamExt;

use super::{ApiClient, PayloadStream};
use crate::error::ApiError;
use crate::resource::Resource;

#[derive(Debug, Default, Clone)]
pub struct FixtureClient {
    payloads: HashMap<(String, String), Vec<serde_json::Value>>,
    failures: HashSet<(String, String)>,
}

impl FixtureClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one payload returned when enumerating `type_name` under the
    /// parent with the given key.
    pub fn with_payload(
        mut self,
        parent_key: impl Into<String>,
        type_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        self.payloads
            .entry((parent_key.into(), type_name.into()))
            .or_default()
            .push(payload);
        self
    }

    /// Make enumeration of `type_name` under the given parent fail.
    pub fn with_failure(
        mut self,
        parent_key: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        self.failures.insert((parent_key.into(), type_name.into()));
        self
    }
}

#[async_trait]
impl ApiClient for FixtureClient {
    async fn enumerate(
        &self,
        type_name: &str,
        parent: &Resource,
    ) -> Result<PayloadStream, ApiError> {
        let pair = (parent.key.clone(), type_name.to_string());
        if self.failures.contains(&pair) {
            return Err(ApiError::Enumeration {
                type_name: type_name.to_string(),
                parent: parent.reference(),
                reason: "injected fixture failure".to_string(),
            });
        }

        let items = self.payloads.get(&pair).cloned().unwrap_or_default();
        Ok(futures::stream::iter(items.into_iter().map(Ok::<_, ApiError>)).boxed())
    }
}
