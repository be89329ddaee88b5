use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::format::FormatError;

/// Anything a multi-target command can be run over.
pub trait Identify {
    fn identifier(&self) -> &str;
}

impl Identify for String {
    fn identifier(&self) -> &str {
        self
    }
}

impl Identify for &str {
    fn identifier(&self) -> &str {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudInitConfig {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "cloud-init", default, skip_serializing_if = "Option::is_none")]
    pub cloud_init: Option<CloudInitData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudInitData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userdata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendordata: Option<Value>,
}

impl Identify for CloudInitConfig {
    fn identifier(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupData {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "meta-data", default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<CloudConfigFile>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identify for GroupData {
    fn identifier(&self) -> &str {
        &self.name
    }
}

/// Bulk group listings come back keyed by name; flatten them in name order.
pub fn groups_by_name(groups: BTreeMap<String, GroupData>) -> Vec<GroupData> {
    groups
        .into_iter()
        .map(|(name, mut group)| {
            if group.name.is_empty() {
                group.name = name;
            }
            group
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfigFile {
    #[serde(default)]
    pub content: String,
    #[serde(default = "plain")]
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

fn plain() -> String {
    "plain".to_string()
}

impl CloudConfigFile {
    /// The cloud-config text with any transfer encoding removed.
    pub fn decoded(&self) -> Result<String, FormatError> {
        match self.encoding.as_str() {
            "plain" => Ok(self.content.clone()),
            "base64" => {
                let compact: String = self.content.split_whitespace().collect();
                let bytes = STANDARD.decode(compact)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => Err(FormatError::Encoding(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "availability-zone", default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(rename = "cluster-name", default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(rename = "public-keys", default, skip_serializing_if = "Option::is_none")]
    pub public_keys: Option<Vec<String>>,
    #[serde(rename = "base-url", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "instance-id", default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(rename = "local-hostname", default, skip_serializing_if = "Option::is_none")]
    pub local_hostname: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identify for InstanceInfo {
    fn identifier(&self) -> &str {
        &self.id
    }
}
