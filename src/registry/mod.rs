//! Resource type registry.
//!
//! A static table of resource type descriptors: which types attach under
//! which parents, which children a type enumerates (in declared order), and
//! the per-type construct/convert capabilities. The table is validated once
//! at startup (every parent/child reference must resolve and the type
//! dependency graph must be acyclic) so traversal and import never meet an
//! inconsistent hierarchy at runtime.

use std::collections::HashMap;

use crate::error::{MalformedPayload, RegistryError};
use crate::resource::Resource;

mod types;

pub use types::builtin_descriptors;

/// Turns one raw payload into a `Resource` attached to the given parent.
pub type ConstructFn =
    fn(&ResourceTypeDescriptor, &Resource, serde_json::Value) -> Result<Resource, MalformedPayload>;

/// Maps a raw payload to the normalized display columns of a model row.
pub type ConvertFn = fn(&serde_json::Value) -> serde_json::Value;

/// Static declaration of one resource kind.
pub struct ResourceTypeDescriptor {
    /// Unique type name.
    pub name: &'static str,
    /// Types this kind may attach under.
    pub parents: &'static [&'static str],
    /// Child types enumerated under this kind, in crawl order.
    pub children: &'static [&'static str],
    /// Service that must be enabled on the parent before this kind is
    /// enumerable. `None` means unconditionally enumerable.
    pub requires_service: Option<&'static str>,
    /// Payload field carrying the provider-assigned id.
    pub key_field: &'static str,
    /// Payload field carrying the human-readable name. Also the stable
    /// field feeding synthetic key generation when `key_field` is absent.
    pub display_field: &'static str,
    pub construct: ConstructFn,
    pub convert: ConvertFn,
}

impl std::fmt::Debug for ResourceTypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTypeDescriptor")
            .field("name", &self.name)
            .field("parents", &self.parents)
            .field("children", &self.children)
            .field("requires_service", &self.requires_service)
            .finish()
    }
}

/// Validated descriptor table.
#[derive(Debug)]
pub struct Registry {
    descriptors: Vec<ResourceTypeDescriptor>,
    index: HashMap<&'static str, usize>,
    import_order: Vec<&'static str>,
}

impl Registry {
    /// Build and validate a registry from a descriptor table.
    ///
    /// Fails fast with `RegistryError::Integrity` on duplicate names,
    /// unresolved parent/child references, a child that does not declare
    /// its parent back, or a cycle in the type dependency graph.
    pub fn new(descriptors: Vec<ResourceTypeDescriptor>) -> Result<Self, RegistryError> {
        let mut index = HashMap::new();
        for (i, desc) in descriptors.iter().enumerate() {
            if index.insert(desc.name, i).is_some() {
                return Err(RegistryError::Integrity(format!(
                    "duplicate resource type '{}'",
                    desc.name
                )));
            }
        }

        for desc in &descriptors {
            for parent in desc.parents {
                if !index.contains_key(parent) {
                    return Err(RegistryError::Integrity(format!(
                        "'{}' declares unknown parent type '{}'",
                        desc.name, parent
                    )));
                }
            }
            for child in desc.children {
                let Some(&ci) = index.get(child) else {
                    return Err(RegistryError::Integrity(format!(
                        "'{}' declares unknown child type '{}'",
                        desc.name, child
                    )));
                };
                if !descriptors[ci].parents.contains(&desc.name) {
                    return Err(RegistryError::Integrity(format!(
                        "'{}' lists '{}' as a child, but '{}' does not declare it as a parent",
                        desc.name, child, child
                    )));
                }
            }
        }

        let import_order = topo_order(&descriptors)?;

        Ok(Self {
            descriptors,
            index,
            import_order,
        })
    }

    /// The built-in organization/folder/project hierarchy.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(builtin_descriptors())
    }

    /// Look up one descriptor by type name.
    pub fn describe(&self, name: &str) -> Result<&ResourceTypeDescriptor, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| RegistryError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Child descriptors of a type, in declared crawl order.
    pub fn children_of(&self, name: &str) -> Result<Vec<&ResourceTypeDescriptor>, RegistryError> {
        let desc = self.describe(name)?;
        // Post-validation every child name resolves.
        Ok(desc
            .children
            .iter()
            .filter_map(|c| self.index.get(c).map(|&i| &self.descriptors[i]))
            .collect())
    }

    /// Type names in dependency order: every parent type precedes all of
    /// its child types. This is the walk order for model import.
    pub fn import_order(&self) -> &[&'static str] {
        &self.import_order
    }

    /// All registered type names, in declared order.
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.name)
    }
}

/// Kahn's algorithm over the parent→child edges, stable with respect to
/// declared order so the import walk is deterministic.
fn topo_order(descriptors: &[ResourceTypeDescriptor]) -> Result<Vec<&'static str>, RegistryError> {
    let mut indegree: HashMap<&str, usize> =
        descriptors.iter().map(|d| (d.name, 0usize)).collect();
    for desc in descriptors {
        for child in desc.children {
            if let Some(e) = indegree.get_mut(child) {
                *e += 1;
            }
        }
    }

    let mut remaining: Vec<usize> = (0..descriptors.len()).collect();
    let mut order = Vec::with_capacity(descriptors.len());
    while !remaining.is_empty() {
        let pos = remaining
            .iter()
            .position(|&i| indegree[descriptors[i].name] == 0);
        let Some(pos) = pos else {
            let stuck: Vec<&str> = remaining.iter().map(|&i| descriptors[i].name).collect();
            return Err(RegistryError::Integrity(format!(
                "dependency cycle among resource types: {}",
                stuck.join(", ")
            )));
        };
        let i = remaining.remove(pos);
        for child in descriptors[i].children {
            if let Some(e) = indegree.get_mut(child) {
                *e -= 1;
            }
        }
        order.push(descriptors[i].name);
    }
    Ok(order)
}
