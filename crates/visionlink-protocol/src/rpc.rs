use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One call, host to device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// The device's answer to one [`RpcRequest`]. Exactly one of `result` and
/// `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Method names understood by the device firmware.
pub mod methods {
    pub const WATCHDOG_KEEPALIVE: &str = "watchdogKeepalive";
    pub const SET_LOG_LEVEL: &str = "setLogLevel";
    pub const GET_LOG_LEVEL: &str = "getLogLevel";
    pub const SET_SYSTEM_INFORMATION_LOGGING_RATE: &str = "setSystemInformationLoggingRate";
    pub const GET_SYSTEM_INFORMATION_LOGGING_RATE: &str = "getSystemInformationLoggingRate";
    pub const IS_PIPELINE_RUNNING: &str = "isPipelineRunning";
    pub const SET_PIPELINE_SCHEMA: &str = "setPipelineSchema";
    pub const SET_ASSETS: &str = "setAssets";
    pub const MEMORY_ALLOC: &str = "memoryAlloc";
    pub const READ_FROM_XLINK: &str = "readFromXLink";
    pub const SET_ASSET_STORAGE: &str = "setAssetStorage";
    pub const BUILD_PIPELINE: &str = "buildPipeline";
    pub const START_PIPELINE: &str = "startPipeline";
    pub const GET_MX_ID: &str = "getMxId";
    pub const GET_CONNECTED_CAMERAS: &str = "getConnectedCameras";
    pub const GET_USB_SPEED: &str = "getUsbSpeed";
    pub const GET_DDR_MEMORY_USAGE: &str = "getDdrMemoryUsage";
    pub const GET_CMX_MEMORY_USAGE: &str = "getCmxMemoryUsage";
    pub const GET_LEON_CSS_HEAP_USAGE: &str = "getLeonCssHeapUsage";
    pub const GET_LEON_MSS_HEAP_USAGE: &str = "getLeonMssHeapUsage";
    pub const GET_CHIP_TEMPERATURE: &str = "getChipTemperature";
    pub const GET_LEON_CSS_CPU_USAGE: &str = "getLeonCssCpuUsage";
    pub const GET_LEON_MSS_CPU_USAGE: &str = "getLeonMssCpuUsage";
}
