//! Discovered cloud resources.
//!
//! A `Resource` is one entity discovered during a crawl. It is immutable
//! once stored and exists only within the scope of one inventory index.
//! The `parent_key`/`parent_type` pair is a back-reference used for
//! hierarchy reconstruction, not ownership.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One discovered cloud entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Provider-assigned id, or a synthesized deterministic hash when the
    /// payload carries none.
    pub key: String,
    /// Resource type name; matches a registry descriptor.
    pub type_name: String,
    pub display_name: Option<String>,
    pub parent_key: Option<String>,
    pub parent_type: Option<String>,
    /// Opaque raw payload as returned by the provider API.
    pub raw_data: serde_json::Value,
}

impl Resource {
    /// A crawl-root seed. Seeds anchor the traversal and give children a
    /// parent reference but are never stored themselves.
    pub fn seed(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            type_name: type_name.into(),
            display_name: None,
            parent_key: None,
            parent_type: None,
            raw_data: serde_json::Value::Null,
        }
    }

    /// Whether the given service is enabled on this resource.
    ///
    /// Looked up in the payload's `enabledServices` list; a resource whose
    /// payload carries no such list has nothing enabled.
    pub fn service_enabled(&self, service: &str) -> bool {
        self.raw_data
            .get("enabledServices")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().any(|s| s.as_str() == Some(service)))
            .unwrap_or(false)
    }

    /// Deterministic key for resources whose payload has no provider id.
    ///
    /// Hashes the type name, parent key and display name, so a re-crawl of
    /// an unchanged resource produces the same key. The stable fields that
    /// feed the hash are fixed per type in the registry's descriptor table.
    pub fn synthetic_key(type_name: &str, parent_key: &str, name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(type_name.as_bytes());
        hasher.update(b"\n");
        hasher.update(parent_key.as_bytes());
        hasher.update(b"\n");
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        // 16 hex chars is plenty of headroom within one parent scope.
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// `type/key` reference to this resource, used in log context and as
    /// the full-name prefix for children of unstored seeds.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.type_name, self.key)
    }
}
