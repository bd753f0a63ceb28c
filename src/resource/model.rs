//! ARM payload projections
//!
//! ARM bodies stay `serde_json::Value` everywhere; only the fields tarm
//! inspects are decoded into these types.

use crate::error::{ArmError, ArmResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Provider namespace (lower-cased) -> resource types registered under it
pub type ProviderMap = BTreeMap<String, Vec<ResourceTypeDescriptor>>;

/// Catalog entry for one resource type of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeDescriptor {
    /// Type path relative to the namespace, e.g. `vaults` or `vaults/keys`
    pub resource_type: String,
    #[serde(default)]
    pub locations: Vec<String>,
    /// Newest first, as ARM lists them
    #[serde(default)]
    pub api_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_api_version: Option<String>,
    #[serde(default)]
    pub capabilities: String,
}

impl ResourceTypeDescriptor {
    /// `defaultApiVersion` if set, else the newest listed version
    pub fn api_version(&self) -> Option<&str> {
        self.default_api_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| self.api_versions.first().map(String::as_str))
    }

    /// Whether this type sits directly under the namespace
    pub fn is_top_level(&self) -> bool {
        !self.resource_type.contains('/')
    }
}

/// One entry of `GET /providers`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderNamespace {
    pub namespace: String,
    #[serde(default)]
    pub resource_types: Vec<ResourceTypeDescriptor>,
}

impl ProviderNamespace {
    pub fn from_value(value: &Value) -> ArmResult<Self> {
        Self::deserialize(value)
            .map_err(|e| ArmError::resolution(format!("provider listing entry: {}", e)))
    }
}

/// Build the provider map from the `GET /providers` result
pub fn build_provider_map(listing: &Value) -> ArmResult<ProviderMap> {
    let entries = listing
        .as_array()
        .ok_or_else(|| ArmError::resolution("provider listing: expected an array"))?;

    let mut map = ProviderMap::new();
    for entry in entries {
        let provider = ProviderNamespace::from_value(entry)?;
        map.insert(provider.namespace.to_lowercase(), provider.resource_types);
    }
    Ok(map)
}

/// A listed ARM resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmResource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl ArmResource {
    pub fn from_value(value: &Value) -> ArmResult<Self> {
        Self::deserialize(value).map_err(|e| ArmError::resolution(format!("resource entry: {}", e)))
    }

    /// Decode every element of a listing; non-arrays decode to nothing
    pub fn list_from(value: &Value) -> ArmResult<Vec<Self>> {
        match value {
            Value::Array(items) => items.iter().map(Self::from_value).collect(),
            Value::Null => Ok(Vec::new()),
            _ => Err(ArmError::resolution("resource listing: expected an array")),
        }
    }
}
