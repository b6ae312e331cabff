//! CAPI Core - Streaming session logic for CAPI position sensors
//!
//! This crate provides:
//! - Capability negotiation (API revision parsing)
//! - Port bring-up, parameter configuration and stream control
//! - The session lifecycle orchestrator
//! - Collaborator traits (device transport, tool decoder, resolver)
//! - An in-process simulated device
//! - Error and log sink types

/// Library version, as reported in the startup banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod capability;
pub mod config;
pub mod discovery;
pub mod error;
pub mod log;
pub mod params;
pub mod ports;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod streaming;
pub mod types;

// Re-export common types
pub use capability::{supports_streaming, ApiRevision};
pub use config::{ParameterSetting, SessionConfig};
pub use discovery::{discover_host, Resolver, StaticResolver};
pub use error::{CapabilityError, CapiError, DeviceError, ParseError, Result};
pub use log::{ConsoleSink, LogSink, RecordingSink, TracingSink};
pub use params::{ParameterConfigurator, ParameterWarning};
pub use ports::PortSequencer;
pub use protocol::{Capi, ToolDecoder, ToolFrameCodec};
pub use session::{Session, SessionPhase, SessionReport};
pub use simulator::{Faults, SimulatedDevice};
pub use streaming::{DispatchOutcome, DispatchSkip, PacketHandler, StreamCommand, StreamingController};
pub use types::{Packet, Port, PortHandle, PortSearch, PortState, StreamPacket, ToolRecord};

/// Library version string
pub fn version() -> &'static str {
    VERSION
}
