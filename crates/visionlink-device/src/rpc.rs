use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;
use visionlink_protocol::{RpcRequest, RpcResponse};
use visionlink_stream::StreamChannel;

use crate::error::{DeviceError, Result};

/// Request/response calls over one dedicated stream.
///
/// The stream carries one exchange at a time, so calls are serialized: a
/// call made while another is in flight waits for it to finish.
pub struct RpcClient {
    inner: Mutex<Inner>,
}

struct Inner {
    stream: StreamChannel,
    next_id: u64,
}

impl RpcClient {
    pub fn new(stream: StreamChannel) -> Self {
        Self {
            inner: Mutex::new(Inner { stream, next_id: 1 }),
        }
    }

    /// Call `method` and decode its result as `T`.
    ///
    /// Link errors propagate unchanged; a device-side error becomes
    /// [`DeviceError::Rpc`].
    pub fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;

        let request = RpcRequest::new(id, method, params).to_bytes()?;
        inner.stream.write(&request)?;
        let reply = inner.stream.read()?;
        drop(inner);

        let response = RpcResponse::from_bytes(&reply)?;
        if response.id != id {
            return Err(DeviceError::Rpc {
                method: method.to_string(),
                message: format!("response id {} does not match request id {id}", response.id),
            });
        }
        if let Some(message) = response.error {
            return Err(DeviceError::Rpc {
                method: method.to_string(),
                message,
            });
        }
        trace!(method, id, "rpc returned");
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }
}
