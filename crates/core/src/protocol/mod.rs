//! Collaborator interfaces: the command/response transport and the
//! binary frame decoder.
//!
//! The session core never encodes commands or parses frames itself.
//! It drives a [`Capi`] implementation and hands binary payloads to a
//! [`ToolDecoder`].

pub mod codec;

pub use codec::ToolFrameCodec;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DeviceError;
use crate::types::{BinaryPacket, PortHandle, PortInfo, PortSearch, StreamPacket, ToolRecord};

/// Result of one collaborator call
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Command/response connection to a measurement device
///
/// Every method is one round trip. Port operations take the port handle
/// explicitly; implementations must not cache handles between calls.
#[async_trait]
pub trait Capi: Send {
    /// Open the connection
    async fn connect(&mut self) -> DeviceResult<()>;

    /// Close the connection
    async fn disconnect(&mut self) -> DeviceResult<()>;

    /// Human readable description of the target (host, port)
    fn connection_info(&self) -> String;

    /// Log every command and reply through the session sink
    fn set_log_transit(&mut self, _enabled: bool) {}

    async fn api_revision(&mut self) -> DeviceResult<String>;

    async fn initialize(&mut self) -> DeviceResult<()>;

    async fn set_user_parameter(&mut self, name: &str, value: &str) -> DeviceResult<()>;

    /// Read a parameter; the reply is `name=value` or an error string
    async fn get_user_parameter(&mut self, name: &str) -> DeviceResult<String>;

    /// Request a fresh port handle; `Ok(None)` when no slot is free
    async fn port_handle_request(&mut self) -> DeviceResult<Option<PortHandle>>;

    async fn port_handle_search(&mut self, filter: PortSearch) -> DeviceResult<Vec<PortHandle>>;

    async fn port_load_srom(&mut self, port: &PortHandle, path: &str) -> DeviceResult<()>;

    async fn port_initialize(&mut self, port: &PortHandle) -> DeviceResult<()>;

    async fn port_enable(&mut self, port: &PortHandle) -> DeviceResult<()>;

    async fn port_info(&mut self, port: &PortHandle) -> DeviceResult<PortInfo>;

    async fn tracking_start(&mut self) -> DeviceResult<()>;

    async fn tracking_stop(&mut self) -> DeviceResult<()>;

    /// Send the stream start command; packets are then stamped with `tag`
    async fn stream_start(&mut self, command: &str, tag: &str) -> DeviceResult<()>;

    /// Send the stream stop command for `tag` and wait for the acknowledgement
    async fn stream_stop(&mut self, tag: &str) -> DeviceResult<()>;

    /// Hand over the inbound packet channel. Returns `None` once taken.
    fn take_packet_stream(&mut self) -> Option<mpsc::Receiver<StreamPacket>>;
}

/// Turns a binary frame into tool records. Must be pure.
pub trait ToolDecoder: Send + Sync {
    fn decode(&self, packet: &BinaryPacket) -> DeviceResult<Vec<ToolRecord>>;
}
