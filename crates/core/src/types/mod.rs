//! Domain types for device sessions

mod packet;
mod port;
mod tool;

pub use packet::{BinaryPacket, Packet, StreamPacket};
pub use port::{Port, PortHandle, PortInfo, PortSearch, PortState};
pub use tool::{ToolRecord, ToolStatus, Transform};
