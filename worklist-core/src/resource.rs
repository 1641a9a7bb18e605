use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WorklistError};

/// Envelope around a FHIR resource fetched from the upstream server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    /// All other fields are stored here
    #[serde(flatten)]
    pub rest: Value,
}

/// FHIR resource metadata
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Meta {
    #[serde(rename = "versionId", skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Value>,
}

impl Resource {
    /// Read the envelope of a resource; the type must be named and any id must be well formed
    pub fn from_json(value: &Value) -> Result<Self> {
        let resource = Resource::deserialize(value)?;
        if !resource.resource_type.starts_with(|c: char| c.is_ascii_uppercase())
            || !resource.resource_type.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(WorklistError::validation(format!(
                "'{}' is not a resource type",
                resource.resource_type
            )));
        }
        if let Some(id) = &resource.id
            && !is_valid_id(id)
        {
            return Err(WorklistError::validation(format!("'{}' is not a resource id", id)));
        }
        Ok(resource)
    }

    /// Relative reference, e.g. `Patient/123`
    pub fn reference(&self) -> Option<String> {
        self.id
            .as_ref()
            .map(|id| format!("{}/{}", self.resource_type, id))
    }

    pub fn is_a(&self, resource_type: &str, id: &str) -> bool {
        self.resource_type == resource_type && self.id.as_deref() == Some(id)
    }
}

/// FHIR logical id: 1 to 64 of `A-Z a-z 0-9 - .`
pub fn is_valid_id(id: &str) -> bool {
    (1..=64).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
}

/// Matched resources of a searchset bundle; `_include`d entries and entries
/// without a well formed resource are skipped
pub fn bundle_resources(bundle: &Value) -> Vec<Value> {
    let Some(entries) = bundle.get("entry").and_then(|e| e.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|entry| {
            entry
                .pointer("/search/mode")
                .and_then(|m| m.as_str())
                .is_none_or(|mode| mode != "include")
        })
        .filter_map(|entry| entry.get("resource"))
        .filter(|resource| match Resource::from_json(resource) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping bundle entry");
                false
            }
        })
        .cloned()
        .collect()
}

/// URL of the `next` page link, if any
pub fn next_link(bundle: &Value) -> Option<String> {
    bundle
        .get("link")?
        .as_array()?
        .iter()
        .find(|link| link.get("relation").and_then(|r| r.as_str()) == Some("next"))
        .and_then(|link| link.get("url"))
        .and_then(|url| url.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_patient() {
        let resource = Resource::from_json(&json!({
            "resourceType": "Patient",
            "id": "123",
            "meta": {
                "versionId": "1",
                "lastUpdated": "2024-01-01T00:00:00Z",
                "tag": [{"code": "vip"}]
            },
            "name": [{"family": "Doe", "given": ["Jane"]}]
        }))
        .unwrap();

        assert_eq!(resource.resource_type, "Patient");
        assert_eq!(resource.reference().as_deref(), Some("Patient/123"));
        assert_eq!(resource.meta.unwrap().tag.len(), 1);
        assert_eq!(resource.rest["name"][0]["family"], "Doe");
    }

    #[test]
    fn test_bundle_resources_skips_includes() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [
                {"resource": {"resourceType": "Task", "id": "t1"}, "search": {"mode": "match"}},
                {"resource": {"resourceType": "Patient", "id": "p1"}, "search": {"mode": "include"}},
                {"resource": {"resourceType": "Task", "id": "t2"}},
                {"resource": {"resourceType": "Task", "id": "../Patient/p1"}},
                {"resource": {"resourceType": 7, "id": "t3"}},
                {"fullUrl": "urn:uuid:broken"}
            ]
        });

        let ids: Vec<_> = bundle_resources(&bundle)
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert!(bundle_resources(&json!({"resourceType": "Bundle"})).is_empty());
    }

    #[test]
    fn test_envelope_rejects_malformed_resources() {
        assert!(matches!(
            Resource::from_json(&json!({"id": "t1"})),
            Err(WorklistError::InvalidJson(_))
        ));
        assert!(matches!(
            Resource::from_json(&json!({"resourceType": "Task", "meta": {"tag": "vip"}})),
            Err(WorklistError::InvalidJson(_))
        ));
        assert!(matches!(
            Resource::from_json(&json!({"resourceType": "task/../x"})),
            Err(WorklistError::Validation { .. })
        ));
        let task = Resource::from_json(&json!({"resourceType": "Task", "id": "t-1.2"})).unwrap();
        assert!(task.is_a("Task", "t-1.2"));
        assert!(!task.is_a("Patient", "t-1.2"));
    }

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("abc-123.DEF"));
        assert!(is_valid_id(&"a".repeat(64)));
        assert!(!is_valid_id(&"a".repeat(65)));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../Patient/1"));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id("a b"));
        assert!(!is_valid_id("a%2Fb"));
    }

    #[test]
    fn test_next_link() {
        let bundle = json!({
            "link": [
                {"relation": "self", "url": "http://fhir/Task?_count=2"},
                {"relation": "next", "url": "http://fhir/Task?_count=2&_offset=2"}
            ]
        });
        assert_eq!(
            next_link(&bundle).as_deref(),
            Some("http://fhir/Task?_count=2&_offset=2")
        );
        assert_eq!(next_link(&json!({"link": []})), None);
    }
}
