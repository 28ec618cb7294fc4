//! Pipeline description handed to the device.
//!
//! Nodes are opaque to the session except for one question: does this node
//! exchange data with the host? [`Node::endpoint`] answers it.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use visionlink_protocol::schema::{
    AssetEntry, AssetMap, NodeConnection, NodeSchema, PipelineSchema, XLINK_IN, XLINK_OUT,
};
use visionlink_protocol::streams::DEFAULT_STREAM_MAX_SIZE;
use visionlink_protocol::Version;

use crate::error::{DeviceError, Result};

pub type NodeId = u32;

/// Asset bytes are placed at multiples of this.
pub const ASSET_ALIGNMENT: usize = 64;

/// A host-facing stream declared by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Host to device.
    Input {
        stream_name: String,
        max_data_size: usize,
    },
    /// Device to host.
    Output { stream_name: String },
}

pub trait Node: Send + Sync {
    /// Node type name, e.g. `"XLinkIn"`.
    fn kind(&self) -> &str;

    fn properties(&self) -> Value;

    /// The stream this node exposes to the host, if any.
    fn endpoint(&self) -> Option<Endpoint> {
        None
    }
}

/// Feeds host data into the pipeline.
#[derive(Debug, Clone)]
pub struct XLinkIn {
    pub stream_name: String,
    pub max_data_size: usize,
    pub num_frames: u32,
}

impl XLinkIn {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            max_data_size: DEFAULT_STREAM_MAX_SIZE,
            num_frames: 8,
        }
    }

    pub fn with_max_data_size(mut self, max_data_size: usize) -> Self {
        self.max_data_size = max_data_size;
        self
    }
}

impl Node for XLinkIn {
    fn kind(&self) -> &str {
        XLINK_IN
    }

    fn properties(&self) -> Value {
        json!({
            "streamName": self.stream_name,
            "maxDataSize": self.max_data_size,
            "numFrames": self.num_frames,
        })
    }

    fn endpoint(&self) -> Option<Endpoint> {
        Some(Endpoint::Input {
            stream_name: self.stream_name.clone(),
            max_data_size: self.max_data_size,
        })
    }
}

/// Sends pipeline results to the host.
#[derive(Debug, Clone)]
pub struct XLinkOut {
    pub stream_name: String,
    /// Negative means unlimited.
    pub fps_limit: f32,
}

impl XLinkOut {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            fps_limit: -1.0,
        }
    }
}

impl Node for XLinkOut {
    fn kind(&self) -> &str {
        XLINK_OUT
    }

    fn properties(&self) -> Value {
        json!({ "streamName": self.stream_name, "maxFpsLimit": self.fps_limit })
    }

    fn endpoint(&self) -> Option<Endpoint> {
        Some(Endpoint::Output {
            stream_name: self.stream_name.clone(),
        })
    }
}

/// Any on-device processing node, described by type name and properties.
#[derive(Debug, Clone)]
pub struct GenericNode {
    pub kind: String,
    pub properties: Value,
}

impl GenericNode {
    pub fn new(kind: impl Into<String>, properties: Value) -> Self {
        Self {
            kind: kind.into(),
            properties,
        }
    }
}

impl Node for GenericNode {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn properties(&self) -> Value {
        self.properties.clone()
    }
}

/// A pipeline in the form the device receives it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedPipeline {
    pub schema: Vec<u8>,
    pub assets: Vec<u8>,
    pub asset_storage: Vec<u8>,
    /// Firmware the pipeline needs, or `None` for the library default.
    pub firmware_version: Option<Version>,
}

#[derive(Default)]
pub struct Pipeline {
    nodes: BTreeMap<NodeId, Box<dyn Node>>,
    connections: Vec<NodeConnection>,
    assets: BTreeMap<String, Vec<u8>>,
    firmware_version: Option<Version>,
    next_id: NodeId,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: impl Node + 'static) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, Box::new(node));
        id
    }

    /// Connect output `output` of node `from` to input `input` of node `to`.
    pub fn link(&mut self, from: NodeId, output: &str, to: NodeId, input: &str) -> Result<()> {
        for id in [from, to] {
            if !self.nodes.contains_key(&id) {
                return Err(DeviceError::PipelineBuild(format!("no node with id {id}")));
            }
        }
        self.connections.push(NodeConnection {
            node1_id: from,
            node1_output: output.to_string(),
            node2_id: to,
            node2_input: input.to_string(),
        });
        Ok(())
    }

    pub fn add_asset(&mut self, key: impl Into<String>, data: Vec<u8>) {
        self.assets.insert(key.into(), data);
    }

    pub fn set_firmware_version(&mut self, version: Version) {
        self.firmware_version = Some(version);
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &dyn Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node.as_ref()))
    }

    /// Host-facing streams declared by the nodes, in node order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.nodes.values().filter_map(|node| node.endpoint()).collect()
    }

    pub fn serialize(&self) -> Result<SerializedPipeline> {
        let schema = PipelineSchema {
            nodes: self
                .nodes
                .iter()
                .map(|(id, node)| NodeSchema {
                    id: *id,
                    name: node.kind().to_string(),
                    properties: node.properties(),
                })
                .collect(),
            connections: self.connections.clone(),
            global_properties: json!({}),
        };

        let mut storage = Vec::new();
        let mut map = AssetMap::default();
        for (key, data) in &self.assets {
            let offset = storage.len().div_ceil(ASSET_ALIGNMENT) * ASSET_ALIGNMENT;
            storage.resize(offset, 0);
            storage.extend_from_slice(data);
            map.map.insert(
                key.clone(),
                AssetEntry {
                    offset: to_u32(offset)?,
                    size: to_u32(data.len())?,
                    alignment: ASSET_ALIGNMENT as u32,
                },
            );
        }

        Ok(SerializedPipeline {
            schema: schema.to_bytes()?,
            assets: serde_json::to_vec(&map)?,
            asset_storage: storage,
            firmware_version: self.firmware_version,
        })
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DeviceError::PipelineBuild("asset storage exceeds 4 GiB".to_string()))
}
