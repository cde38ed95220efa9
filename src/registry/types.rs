//! Built-in resource type table and per-type capabilities.
//!
//! The hierarchy covered here: organization → folder → project →
//! {bucket, instance, image, service_account}. Compute-backed types are
//! gated on the parent project having the `compute` service enabled.

use serde_json::{json, Map, Value};

use super::ResourceTypeDescriptor;
use crate::error::MalformedPayload;
use crate::resource::Resource;

/// The descriptor table the default registry is built from.
pub fn builtin_descriptors() -> Vec<ResourceTypeDescriptor> {
    vec![
        ResourceTypeDescriptor {
            name: "organization",
            parents: &[],
            children: &["folder", "project"],
            requires_service: None,
            key_field: "name",
            display_field: "displayName",
            construct: construct_standard,
            convert: convert_organization,
        },
        ResourceTypeDescriptor {
            name: "folder",
            parents: &["organization"],
            children: &["project"],
            requires_service: None,
            key_field: "id",
            display_field: "displayName",
            construct: construct_standard,
            convert: convert_folder,
        },
        ResourceTypeDescriptor {
            name: "project",
            parents: &["organization", "folder"],
            children: &["bucket", "instance", "image", "service_account"],
            requires_service: None,
            key_field: "projectId",
            display_field: "name",
            construct: construct_standard,
            convert: convert_project,
        },
        ResourceTypeDescriptor {
            name: "bucket",
            parents: &["project"],
            children: &[],
            requires_service: None,
            key_field: "id",
            display_field: "name",
            construct: construct_standard,
            convert: convert_bucket,
        },
        ResourceTypeDescriptor {
            name: "instance",
            parents: &["project"],
            children: &[],
            requires_service: Some("compute"),
            key_field: "id",
            display_field: "name",
            construct: construct_standard,
            convert: convert_instance,
        },
        ResourceTypeDescriptor {
            name: "image",
            parents: &["project"],
            children: &[],
            requires_service: Some("compute"),
            key_field: "id",
            display_field: "name",
            construct: construct_standard,
            convert: convert_image,
        },
        ResourceTypeDescriptor {
            name: "service_account",
            parents: &["project"],
            children: &[],
            requires_service: None,
            key_field: "uniqueId",
            display_field: "email",
            construct: construct_standard,
            convert: convert_service_account,
        },
    ]
}

fn field_str(obj: &Map<String, Value>, field: &str) -> Option<String> {
    match obj.get(field) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Standard constructor: provider id from the descriptor's key field, with
/// a synthetic key derived from the display field when the id is absent.
pub(crate) fn construct_standard(
    desc: &ResourceTypeDescriptor,
    parent: &Resource,
    payload: Value,
) -> Result<Resource, MalformedPayload> {
    let obj = payload.as_object().ok_or_else(|| MalformedPayload {
        type_name: desc.name.to_string(),
        reason: "payload is not a JSON object".to_string(),
    })?;

    let display_name = field_str(obj, desc.display_field);
    let key = match field_str(obj, desc.key_field) {
        Some(key) => key,
        None => {
            let name = display_name.clone().ok_or_else(|| MalformedPayload {
                type_name: desc.name.to_string(),
                reason: format!(
                    "payload carries neither '{}' nor '{}'",
                    desc.key_field, desc.display_field
                ),
            })?;
            Resource::synthetic_key(desc.name, &parent.key, &name)
        }
    };

    Ok(Resource {
        key,
        type_name: desc.name.to_string(),
        display_name,
        parent_key: Some(parent.key.clone()),
        parent_type: Some(parent.type_name.clone()),
        raw_data: payload,
    })
}

fn pick(raw: &Value, field: &str) -> Value {
    raw.get(field).cloned().unwrap_or(Value::Null)
}

/// Fallback converter: display name only.
pub(crate) fn convert_minimal(raw: &Value) -> Value {
    json!({ "name": pick(raw, "name") })
}

fn convert_organization(raw: &Value) -> Value {
    json!({
        "display_name": pick(raw, "displayName"),
        "state": pick(raw, "lifecycleState"),
    })
}

fn convert_folder(raw: &Value) -> Value {
    json!({
        "display_name": pick(raw, "displayName"),
        "state": pick(raw, "lifecycleState"),
    })
}

fn convert_project(raw: &Value) -> Value {
    json!({
        "project_id": pick(raw, "projectId"),
        "project_number": pick(raw, "projectNumber"),
        "display_name": pick(raw, "name"),
        "state": pick(raw, "lifecycleState"),
    })
}

fn convert_bucket(raw: &Value) -> Value {
    json!({
        "display_name": pick(raw, "name"),
        "location": pick(raw, "location"),
        "storage_class": pick(raw, "storageClass"),
    })
}

fn convert_instance(raw: &Value) -> Value {
    json!({
        "display_name": pick(raw, "name"),
        "status": pick(raw, "status"),
        "machine_type": pick(raw, "machineType"),
    })
}

fn convert_image(raw: &Value) -> Value {
    json!({
        "display_name": pick(raw, "name"),
        "status": pick(raw, "status"),
        "family": pick(raw, "family"),
        "disk_size_gb": pick(raw, "diskSizeGb"),
    })
}

fn convert_service_account(raw: &Value) -> Value {
    json!({
        "email": pick(raw, "email"),
        "display_name": pick(raw, "displayName"),
        "disabled": pick(raw, "disabled"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn project_parent() -> Resource {
        Resource::seed("project", "p1")
    }

    #[test]
    fn construct_uses_provider_id() {
        let registry = Registry::builtin().unwrap();
        let desc = registry.describe("image").unwrap();
        let payload = json!({ "id": "img1", "name": "debian-12" });

        let res = (desc.construct)(desc, &project_parent(), payload).unwrap();
        assert_eq!(res.key, "img1");
        assert_eq!(res.type_name, "image");
        assert_eq!(res.display_name.as_deref(), Some("debian-12"));
        assert_eq!(res.parent_key.as_deref(), Some("p1"));
        assert_eq!(res.parent_type.as_deref(), Some("project"));
    }

    #[test]
    fn construct_synthesizes_key_when_id_missing() {
        let registry = Registry::builtin().unwrap();
        let desc = registry.describe("bucket").unwrap();
        let payload = json!({ "name": "logs" });

        let first = (desc.construct)(desc, &project_parent(), payload.clone()).unwrap();
        let second = (desc.construct)(desc, &project_parent(), payload).unwrap();
        assert_eq!(first.key, second.key, "synthetic keys must be stable");
        assert_eq!(first.key.len(), 16);
    }

    #[test]
    fn construct_rejects_non_object_payload() {
        let registry = Registry::builtin().unwrap();
        let desc = registry.describe("bucket").unwrap();
        let err = (desc.construct)(desc, &project_parent(), json!("scalar")).unwrap_err();
        assert!(format!("{err}").contains("not a JSON object"));
    }

    #[test]
    fn construct_rejects_payload_without_key_or_name() {
        let registry = Registry::builtin().unwrap();
        let desc = registry.describe("bucket").unwrap();
        let err = (desc.construct)(desc, &project_parent(), json!({ "location": "EU" })).unwrap_err();
        assert!(format!("{err}").contains("neither"));
    }

    #[test]
    fn project_converter_normalizes_fields() {
        let registry = Registry::builtin().unwrap();
        let desc = registry.describe("project").unwrap();
        let raw = json!({
            "projectId": "p1",
            "projectNumber": 42,
            "name": "Project One",
            "lifecycleState": "ACTIVE",
        });
        let display = (desc.convert)(&raw);
        assert_eq!(display["project_id"], "p1");
        assert_eq!(display["project_number"], 42);
        assert_eq!(display["state"], "ACTIVE");
    }
}
