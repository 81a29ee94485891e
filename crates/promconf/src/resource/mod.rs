//! ConfigMap-shaped resources delivered by the resource source.

pub mod annotations;
pub mod manifest;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use annotations::{parse_bool, AnnotationKey, Annotations, Category};

/// Identity of a resource within the watched set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One annotated key/value bundle.
///
/// `data` is kept sorted so fragments are always visited in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            data: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Reads the annotation contract using the given prefix.
    pub fn annotations(&self, prefix: &str) -> Annotations {
        Annotations::read(&self.annotations, prefix)
    }

    /// Two resources are semantically identical when their data and
    /// annotations match key for key. Namespace and name are not compared.
    pub fn is_semantically_identical(&self, other: &Resource) -> bool {
        self.data == other.data && self.annotations == other.annotations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_identity_ignores_order() {
        let a = Resource::new("monitoring", "rules")
            .with_data("a.yml", "x")
            .with_data("b.yml", "y")
            .with_annotation("prometheus.net/rule", "true");
        let b = Resource::new("monitoring", "rules")
            .with_annotation("prometheus.net/rule", "true")
            .with_data("b.yml", "y")
            .with_data("a.yml", "x");

        assert!(a.is_semantically_identical(&b));
    }

    #[test]
    fn test_semantic_identity_detects_changes() {
        let base = Resource::new("ns", "cm")
            .with_data("k", "v")
            .with_annotation("prometheus.net/job", "true");

        let changed_value = base.clone().with_data("k", "v2");
        let extra_key = base.clone().with_data("k2", "v");
        let extra_annotation = base.clone().with_annotation("prometheus.net/id", "0");

        assert!(!base.is_semantically_identical(&changed_value));
        assert!(!base.is_semantically_identical(&extra_key));
        assert!(!base.is_semantically_identical(&extra_annotation));
    }

    #[test]
    fn test_resource_key_display() {
        let resource = Resource::new("monitoring", "node-jobs");
        assert_eq!(resource.key().to_string(), "monitoring/node-jobs");
    }
}
