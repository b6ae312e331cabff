//! Postcard codec for batches of tool records
//!
//! Frame layout: `[4 bytes length (big endian)] [postcard Vec<ToolRecord>]`.
//! This is the frame format produced by the simulated device.

use bytes::Bytes;
use postcard::{from_bytes, to_allocvec};

use super::{DeviceResult, ToolDecoder};
use crate::error::DeviceError;
use crate::types::{BinaryPacket, ToolRecord};

/// Maximum frame payload (1MB)
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame codec for tool batches
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolFrameCodec;

impl ToolFrameCodec {
    /// Encode a batch of tools into a length-prefixed frame
    pub fn encode(tools: &[ToolRecord]) -> DeviceResult<Bytes> {
        let payload = to_allocvec(tools).map_err(|e| DeviceError::Io(e.to_string()))?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(DeviceError::Io(format!(
                "frame too large: {} bytes (max: {})",
                payload.len(),
                MAX_FRAME_SIZE
            )));
        }

        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&payload);

        Ok(Bytes::from(buf))
    }

    /// Decode a length-prefixed frame
    pub fn decode_frame(buf: &[u8]) -> DeviceResult<Vec<ToolRecord>> {
        if buf.len() < 4 {
            return Err(DeviceError::Io("frame too small for length prefix".into()));
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(DeviceError::Io(format!(
                "frame too large: {} bytes (max: {})",
                len, MAX_FRAME_SIZE
            )));
        }

        if buf.len() < 4 + len {
            return Err(DeviceError::Io("frame too small for payload".into()));
        }

        from_bytes(&buf[4..4 + len]).map_err(|e| DeviceError::Io(e.to_string()))
    }
}

impl ToolDecoder for ToolFrameCodec {
    fn decode(&self, packet: &BinaryPacket) -> DeviceResult<Vec<ToolRecord>> {
        Self::decode_frame(packet.payload())
    }
}
