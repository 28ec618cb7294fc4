//! Serialized pipeline description, as sent with `setPipelineSchema` and
//! `setAssets`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Node type names the link layer cares about.
pub const XLINK_IN: &str = "XLinkIn";
pub const XLINK_OUT: &str = "XLinkOut";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSchema {
    pub nodes: Vec<NodeSchema>,
    pub connections: Vec<NodeConnection>,
    #[serde(default)]
    pub global_properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub id: u32,
    pub name: String,
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConnection {
    pub node1_id: u32,
    pub node1_output: String,
    pub node2_id: u32,
    pub node2_input: String,
}

/// Where each asset sits inside the asset storage blob.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetMap {
    pub map: BTreeMap<String, AssetEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
}

impl PipelineSchema {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Stream names of nodes of type `kind`, read from their `streamName`
    /// property.
    pub fn stream_names(&self, kind: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.name == kind)
            .filter_map(|node| node.properties.get("streamName")?.as_str().map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stream_names_by_kind() {
        let schema = PipelineSchema {
            nodes: vec![
                NodeSchema {
                    id: 0,
                    name: XLINK_IN.to_string(),
                    properties: json!({"streamName": "config", "maxDataSize": 1024}),
                },
                NodeSchema {
                    id: 1,
                    name: XLINK_OUT.to_string(),
                    properties: json!({"streamName": "rgb"}),
                },
                NodeSchema {
                    id: 2,
                    name: "ColorCamera".to_string(),
                    properties: json!({}),
                },
            ],
            ..PipelineSchema::default()
        };
        let bytes = schema.to_bytes().unwrap();
        let back = PipelineSchema::from_bytes(&bytes).unwrap();
        assert_eq!(back.stream_names(XLINK_OUT), ["rgb"]);
        assert_eq!(back.stream_names(XLINK_IN), ["config"]);
    }
}
