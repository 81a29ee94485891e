//! Conversion of untyped ConfigMap manifests into [`Resource`] values.
//!
//! This is the only place that looks at raw YAML; everything downstream works
//! on the typed resource.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::Resource;
use crate::error::ControllerError;

pub const MANIFEST_API_VERSION: &str = "v1";
pub const MANIFEST_KIND: &str = "ConfigMap";
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigMapManifest {
    api_version: String,
    kind: String,
    metadata: ManifestMeta,
    #[serde(default)]
    data: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ManifestMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    annotations: Option<BTreeMap<String, String>>,
}

impl Resource {
    /// Converts a parsed YAML document into a resource.
    ///
    /// Fails with [`ControllerError::BadPayload`] for anything that is not a
    /// `v1/ConfigMap` with a name and string-only data and annotations.
    pub fn from_manifest(value: serde_yaml::Value) -> Result<Self, ControllerError> {
        let manifest: ConfigMapManifest = serde_yaml::from_value(value)
            .map_err(|e| ControllerError::BadPayload(e.to_string()))?;

        if manifest.api_version != MANIFEST_API_VERSION || manifest.kind != MANIFEST_KIND {
            return Err(ControllerError::BadPayload(format!(
                "expected {}/{}, got {}/{}",
                MANIFEST_API_VERSION, MANIFEST_KIND, manifest.api_version, manifest.kind
            )));
        }

        if manifest.metadata.name.is_empty() {
            return Err(ControllerError::BadPayload(
                "metadata.name is required".to_string(),
            ));
        }

        let namespace = manifest
            .metadata
            .namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Ok(Resource {
            namespace,
            name: manifest.metadata.name,
            data: manifest.data.unwrap_or_default(),
            annotations: manifest.metadata.annotations.unwrap_or_default(),
        })
    }

    /// Parses a single manifest document from text.
    pub fn from_manifest_str(content: &str) -> Result<Self, ControllerError> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| ControllerError::BadPayload(e.to_string()))?;
        Self::from_manifest(value)
    }
}
