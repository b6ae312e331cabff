//! In-process simulated position sensor
//!
//! Implements [`Capi`] against in-memory state so a full session can run
//! without hardware. Every step can be made to fail, and stream packets can
//! be generated on a timer or injected by hand.

use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{FRAME_FREQUENCY_PARAM, TRACK_FREQUENCY_PARAM};
use crate::error::DeviceError;
use crate::log::LogSink;
use crate::protocol::{Capi, DeviceResult, ToolFrameCodec};
use crate::types::{PortHandle, PortInfo, PortSearch, PortState, StreamPacket, ToolRecord, Transform};

/// Default revision reported by [`SimulatedDevice::vega`]
pub const VEGA_REVISION: &str = "G.003.123";

const PACKET_CHANNEL_CAPACITY: usize = 256;

/// Steps the simulated device should refuse
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub connect: bool,
    pub disconnect: bool,
    pub initialize: bool,
    pub rejected_parameters: HashSet<String>,
    pub unreadable_parameters: HashSet<String>,
    pub srom_load: bool,
    pub port_search: bool,
    pub port_initialize: Option<PortHandle>,
    pub port_enable: Option<PortHandle>,
    pub port_info: Option<PortHandle>,
    pub tracking_start: bool,
    pub tracking_stop: bool,
    pub stream_start: bool,
    pub stream_stop: bool,
}

impl Faults {
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reject_parameter(mut self, name: &str) -> Self {
        self.rejected_parameters.insert(name.to_string());
        self
    }

    #[must_use]
    pub fn unreadable_parameter(mut self, name: &str) -> Self {
        self.unreadable_parameters.insert(name.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct SimPort {
    handle: PortHandle,
    state: PortState,
    srom: Option<String>,
    part_number: String,
}

/// Simulated device
pub struct SimulatedDevice {
    host: String,
    revision: String,
    connected: bool,
    initialized: bool,
    tracking: bool,
    parameters: BTreeMap<String, String>,
    ports: Vec<SimPort>,
    free_slots: Vec<PortHandle>,
    faults: Faults,
    frame_period: Option<Duration>,
    streams: HashMap<String, Option<JoinHandle<()>>>,
    packet_tx: mpsc::Sender<StreamPacket>,
    packet_rx: Option<mpsc::Receiver<StreamPacket>>,
    calls: Vec<String>,
    log: Option<Arc<dyn LogSink>>,
    log_transit: bool,
}

impl SimulatedDevice {
    /// Empty device reporting `revision`, no ports
    pub fn new(host: impl Into<String>, revision: impl Into<String>) -> Self {
        let (packet_tx, packet_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        let mut parameters = BTreeMap::new();
        parameters.insert(FRAME_FREQUENCY_PARAM.to_string(), "60".to_string());
        parameters.insert(TRACK_FREQUENCY_PARAM.to_string(), "1".to_string());

        Self {
            host: host.into(),
            revision: revision.into(),
            connected: false,
            initialized: false,
            tracking: false,
            parameters,
            ports: Vec::new(),
            free_slots: Vec::new(),
            faults: Faults::none(),
            frame_period: None,
            streams: HashMap::new(),
            packet_tx,
            packet_rx: Some(packet_rx),
            calls: Vec::new(),
            log: None,
            log_transit: false,
        }
    }

    /// Vega with two wired tools (`01`, `02`) and one free wireless slot (`0A`)
    pub fn vega(host: impl Into<String>) -> Self {
        Self::new(host, VEGA_REVISION)
            .with_ports(&["01", "02"])
            .with_free_slots(&["0A"])
    }

    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Occupied ports awaiting initialization
    #[must_use]
    pub fn with_ports(mut self, handles: &[&str]) -> Self {
        self.ports = handles
            .iter()
            .enumerate()
            .map(|(i, h)| SimPort {
                handle: PortHandle::new(*h),
                state: PortState::Requested,
                srom: None,
                part_number: format!("8700{:03}", 339 + i),
            })
            .collect();
        self
    }

    /// Handles that [`Capi::port_handle_request`] hands out, in order
    #[must_use]
    pub fn with_free_slots(mut self, handles: &[&str]) -> Self {
        self.free_slots = handles.iter().map(|h| PortHandle::new(*h)).collect();
        self
    }

    #[must_use]
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Emit a frame of every enabled tool each `period` while streaming.
    /// A zero period disables the generator.
    #[must_use]
    pub fn with_frame_period(mut self, period: Duration) -> Self {
        if period.is_zero() {
            tracing::warn!("Ignoring zero frame period, frame generator disabled");
            self.frame_period = None;
        } else {
            self.frame_period = Some(period);
        }
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    /// Sender for pushing packets onto the inbound stream by hand
    pub fn injector(&self) -> mpsc::Sender<StreamPacket> {
        self.packet_tx.clone()
    }

    /// Every command received so far, in order
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn port_state(&self, handle: &str) -> Option<PortState> {
        self.ports
            .iter()
            .find(|p| p.handle.as_str() == handle)
            .map(|p| p.state)
    }

    pub fn active_streams(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.streams.keys().cloned().collect();
        tags.sort();
        tags
    }

    fn command(&mut self, line: String) -> DeviceResult<()> {
        if self.log_transit {
            if let Some(log) = &self.log {
                log.log(&format!(">> {}", line));
            }
        }
        tracing::trace!(command = %line, "simulated device command");
        let needs_connection = line != "CONNECT";
        self.calls.push(line);
        if needs_connection && !self.connected {
            return self.reply(Err(DeviceError::NotConnected));
        }
        Ok(())
    }

    fn reply<T: std::fmt::Debug>(&self, result: DeviceResult<T>) -> DeviceResult<T> {
        if self.log_transit {
            if let Some(log) = &self.log {
                match &result {
                    Ok(value) => log.log(&format!("<< {:?}", value)),
                    Err(e) => log.log(&format!("<< {}", e)),
                }
            }
        }
        result
    }

    fn port_mut(&mut self, handle: &PortHandle, mnemonic: &str) -> DeviceResult<&mut SimPort> {
        self.ports
            .iter_mut()
            .find(|p| &p.handle == handle)
            .ok_or_else(|| DeviceError::rejected(mnemonic, format!("unknown port {}", handle)))
    }

    fn enabled_handles(&self) -> Vec<PortHandle> {
        self.ports
            .iter()
            .filter(|p| p.state == PortState::Enabled)
            .map(|p| p.handle.clone())
            .collect()
    }

    fn stop_generators(&mut self) {
        for (_, task) in self.streams.drain() {
            if let Some(task) = task {
                task.abort();
            }
        }
    }
}

/// One frame of tools with a little positional noise
fn jittered_frame(handles: &[PortHandle], frame_number: u32) -> Vec<ToolRecord> {
    let mut rng = rand::thread_rng();
    handles
        .iter()
        .enumerate()
        .map(|(i, handle)| {
            let offset = 100.0 * i as f32;
            let transform = Transform {
                error: rng.gen_range(0.05..0.25),
                ..Transform::identity().translated(
                    offset + rng.gen_range(-0.5..0.5),
                    rng.gen_range(-0.5..0.5),
                    -1500.0 + rng.gen_range(-0.5..0.5),
                )
            };
            ToolRecord::tracked(handle.clone(), frame_number, transform)
        })
        .collect()
}

fn spawn_generator(
    tx: mpsc::Sender<StreamPacket>,
    tag: String,
    handles: Vec<PortHandle>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut frame_number: u32 = 0;
        loop {
            ticker.tick().await;
            frame_number = frame_number.wrapping_add(1);
            let frame = match ToolFrameCodec::encode(&jittered_frame(&handles, frame_number)) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Failed to encode simulated frame: {}", e);
                    return;
                }
            };
            if tx.send(StreamPacket::binary(tag.clone(), frame)).await.is_err() {
                tracing::debug!("Packet receiver dropped, stopping generator for {}", tag);
                return;
            }
        }
    })
}

#[async_trait]
impl Capi for SimulatedDevice {
    async fn connect(&mut self) -> DeviceResult<()> {
        self.command("CONNECT".into())?;
        if self.faults.connect {
            return self.reply(Err(DeviceError::Io(format!("{}: connection refused", self.host))));
        }
        self.connected = true;
        self.reply(Ok(()))
    }

    async fn disconnect(&mut self) -> DeviceResult<()> {
        self.command("DISCONNECT".into())?;
        if self.faults.disconnect {
            return self.reply(Err(DeviceError::Io("socket shutdown failed".into())));
        }
        self.stop_generators();
        self.tracking = false;
        self.connected = false;
        self.reply(Ok(()))
    }

    fn connection_info(&self) -> String {
        format!("{} (simulated)", self.host)
    }

    fn set_log_transit(&mut self, enabled: bool) {
        self.log_transit = enabled;
    }

    async fn api_revision(&mut self) -> DeviceResult<String> {
        self.command("APIREV".into())?;
        let revision = self.revision.clone();
        self.reply(Ok(revision))
    }

    async fn initialize(&mut self) -> DeviceResult<()> {
        self.command("INIT".into())?;
        if self.faults.initialize {
            return self.reply(Err(DeviceError::rejected("INIT", "ERROR03")));
        }
        self.initialized = true;
        self.reply(Ok(()))
    }

    async fn set_user_parameter(&mut self, name: &str, value: &str) -> DeviceResult<()> {
        self.command(format!("SET {}={}", name, value))?;
        if self.faults.rejected_parameters.contains(name) {
            return self.reply(Err(DeviceError::rejected("SET", "ERROR0E")));
        }
        self.parameters.insert(name.to_string(), value.to_string());
        self.reply(Ok(()))
    }

    async fn get_user_parameter(&mut self, name: &str) -> DeviceResult<String> {
        self.command(format!("GET {}", name))?;
        if self.faults.unreadable_parameters.contains(name) {
            return self.reply(Err(DeviceError::rejected("GET", "ERROR0E")));
        }
        let result = match self.parameters.get(name) {
            Some(value) => Ok(format!("{}={}", name, value)),
            None => Err(DeviceError::rejected("GET", format!("unknown parameter {}", name))),
        };
        self.reply(result)
    }

    async fn port_handle_request(&mut self) -> DeviceResult<Option<PortHandle>> {
        self.command("PHRQ".into())?;
        if self.free_slots.is_empty() {
            return self.reply(Ok(None));
        }
        let handle = self.free_slots.remove(0);
        self.ports.push(SimPort {
            handle: handle.clone(),
            state: PortState::Requested,
            srom: None,
            part_number: "960556".to_string(),
        });
        self.reply(Ok(Some(handle)))
    }

    async fn port_handle_search(&mut self, filter: PortSearch) -> DeviceResult<Vec<PortHandle>> {
        self.command(format!("PHSR {}", filter))?;
        if self.faults.port_search {
            return self.reply(Err(DeviceError::rejected("PHSR", "ERROR01")));
        }
        let handles = self
            .ports
            .iter()
            .filter(|p| match filter {
                PortSearch::All => true,
                PortSearch::ToBeFreed => false,
                PortSearch::NotInitialized => p.state < PortState::Initialized,
                PortSearch::InitializedNotEnabled => p.state == PortState::Initialized,
                PortSearch::Enabled => p.state == PortState::Enabled,
            })
            .map(|p| p.handle.clone())
            .collect();
        self.reply(Ok(handles))
    }

    async fn port_load_srom(&mut self, port: &PortHandle, path: &str) -> DeviceResult<()> {
        self.command(format!("PVWR {} {}", port, path))?;
        if self.faults.srom_load {
            return self.reply(Err(DeviceError::Io(format!("cannot read {}", path))));
        }
        let sim = match self.port_mut(port, "PVWR") {
            Ok(sim) => sim,
            Err(e) => return self.reply(Err(e)),
        };
        sim.srom = Some(path.to_string());
        sim.state = sim.state.max(PortState::SromLoaded);
        self.reply(Ok(()))
    }

    async fn port_initialize(&mut self, port: &PortHandle) -> DeviceResult<()> {
        self.command(format!("PINIT {}", port))?;
        if self.faults.port_initialize.as_ref() == Some(port) {
            return self.reply(Err(DeviceError::rejected("PINIT", "ERROR0A")));
        }
        let sim = match self.port_mut(port, "PINIT") {
            Ok(sim) => sim,
            Err(e) => return self.reply(Err(e)),
        };
        sim.state = sim.state.max(PortState::Initialized);
        self.reply(Ok(()))
    }

    async fn port_enable(&mut self, port: &PortHandle) -> DeviceResult<()> {
        self.command(format!("PENA {}", port))?;
        if self.faults.port_enable.as_ref() == Some(port) {
            return self.reply(Err(DeviceError::rejected("PENA", "ERROR0D")));
        }
        let sim = match self.port_mut(port, "PENA") {
            Ok(sim) => sim,
            Err(e) => return self.reply(Err(e)),
        };
        if sim.state < PortState::Initialized {
            return self.reply(Err(DeviceError::rejected("PENA", "port not initialized")));
        }
        sim.state = PortState::Enabled;
        self.reply(Ok(()))
    }

    async fn port_info(&mut self, port: &PortHandle) -> DeviceResult<PortInfo> {
        self.command(format!("PHINF {}", port))?;
        if self.faults.port_info.as_ref() == Some(port) {
            return self.reply(Err(DeviceError::rejected("PHINF", "ERROR01")));
        }
        let sim = match self.port_mut(port, "PHINF") {
            Ok(sim) => sim.clone(),
            Err(e) => return self.reply(Err(e)),
        };
        let mut info = PortInfo::new()
            .with("Tool Type", "Pointer")
            .with("Part Number", sim.part_number)
            .with("Serial Number", format!("3A7C0C{}", sim.handle));
        if let Some(srom) = sim.srom {
            info = info.with("SROM", srom);
        }
        self.reply(Ok(info))
    }

    async fn tracking_start(&mut self) -> DeviceResult<()> {
        self.command("TSTART".into())?;
        if self.faults.tracking_start || !self.initialized {
            return self.reply(Err(DeviceError::rejected("TSTART", "ERROR0C")));
        }
        self.tracking = true;
        self.reply(Ok(()))
    }

    async fn tracking_stop(&mut self) -> DeviceResult<()> {
        self.command("TSTOP".into())?;
        if self.faults.tracking_stop {
            return self.reply(Err(DeviceError::rejected("TSTOP", "ERROR0C")));
        }
        self.tracking = false;
        self.reply(Ok(()))
    }

    async fn stream_start(&mut self, command: &str, tag: &str) -> DeviceResult<()> {
        self.command(format!("STREAM --id={} {}", tag, command))?;
        if self.faults.stream_start || !self.tracking {
            return self.reply(Err(DeviceError::rejected("STREAM", "ERROR0C")));
        }
        if self.streams.contains_key(tag) {
            return self.reply(Err(DeviceError::rejected("STREAM", format!("id {} in use", tag))));
        }
        let generator = self.frame_period.map(|period| {
            spawn_generator(
                self.packet_tx.clone(),
                tag.to_string(),
                self.enabled_handles(),
                period,
            )
        });
        self.streams.insert(tag.to_string(), generator);
        self.reply(Ok(()))
    }

    async fn stream_stop(&mut self, tag: &str) -> DeviceResult<()> {
        self.command(format!("USTREAM --id={}", tag))?;
        if self.faults.stream_stop {
            return self.reply(Err(DeviceError::rejected("USTREAM", "ERROR01")));
        }
        match self.streams.remove(tag) {
            Some(generator) => {
                if let Some(task) = generator {
                    task.abort();
                }
                self.reply(Ok(()))
            }
            None => self.reply(Err(DeviceError::rejected("USTREAM", format!("no stream {}", tag)))),
        }
    }

    fn take_packet_stream(&mut self) -> Option<mpsc::Receiver<StreamPacket>> {
        self.packet_rx.take()
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop_generators();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::RecordingSink;
    use crate::types::Packet;

    #[tokio::test]
    async fn test_commands_require_connection() {
        let mut dev = SimulatedDevice::vega("sim");
        assert_eq!(dev.initialize().await, Err(DeviceError::NotConnected));
        dev.connect().await.unwrap();
        dev.initialize().await.unwrap();
        assert_eq!(dev.calls(), ["INIT", "CONNECT", "INIT"]);
    }

    #[tokio::test]
    async fn test_parameter_roundtrip_and_rejection() {
        let mut dev = SimulatedDevice::vega("sim")
            .with_faults(Faults::none().reject_parameter(FRAME_FREQUENCY_PARAM));
        dev.connect().await.unwrap();
        assert!(dev.set_user_parameter(FRAME_FREQUENCY_PARAM, "20").await.is_err());
        dev.set_user_parameter(TRACK_FREQUENCY_PARAM, "2").await.unwrap();
        assert_eq!(
            dev.get_user_parameter(TRACK_FREQUENCY_PARAM).await.unwrap(),
            "Param.Tracking.Track Frequency=2"
        );
        assert_eq!(dev.parameter(FRAME_FREQUENCY_PARAM), Some("60"));
    }

    #[tokio::test]
    async fn test_port_lifecycle() {
        let mut dev = SimulatedDevice::vega("sim");
        dev.connect().await.unwrap();
        let handle = dev.port_handle_request().await.unwrap().unwrap();
        assert_eq!(handle.as_str(), "0A");
        assert_eq!(dev.port_handle_request().await.unwrap(), None);

        dev.port_load_srom(&handle, "tool.rom").await.unwrap();
        assert_eq!(dev.port_state("0A"), Some(PortState::SromLoaded));

        let not_init = dev.port_handle_search(PortSearch::NotInitialized).await.unwrap();
        assert_eq!(not_init.len(), 3);

        assert!(dev.port_enable(&handle).await.is_err());
        dev.port_initialize(&handle).await.unwrap();
        dev.port_enable(&handle).await.unwrap();
        assert_eq!(
            dev.port_handle_search(PortSearch::Enabled).await.unwrap(),
            vec![handle.clone()]
        );
        let info = dev.port_info(&handle).await.unwrap();
        assert_eq!(info.get("SROM"), Some("tool.rom"));
    }

    #[tokio::test]
    async fn test_stream_requires_tracking() {
        let mut dev = SimulatedDevice::vega("sim");
        dev.connect().await.unwrap();
        assert!(dev.stream_start("BX2 --6d=tools", "BX2").await.is_err());
        dev.initialize().await.unwrap();
        dev.tracking_start().await.unwrap();
        dev.stream_start("BX2 --6d=tools", "BX2").await.unwrap();
        assert_eq!(dev.active_streams(), vec!["BX2"]);
        dev.stream_stop("BX2").await.unwrap();
        assert!(dev.stream_stop("BX2").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_emits_decodable_frames() {
        let mut dev = SimulatedDevice::vega("sim").with_frame_period(Duration::from_millis(50));
        let mut rx = dev.take_packet_stream().unwrap();
        assert!(dev.take_packet_stream().is_none());

        dev.connect().await.unwrap();
        dev.initialize().await.unwrap();
        for handle in dev.port_handle_search(PortSearch::NotInitialized).await.unwrap() {
            dev.port_initialize(&handle).await.unwrap();
            dev.port_enable(&handle).await.unwrap();
        }
        dev.tracking_start().await.unwrap();
        dev.stream_start("BX2 --6d=tools", "BX2").await.unwrap();

        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.tag, "BX2");
        let Packet::Binary(binary) = packet.packet else {
            panic!("expected binary packet");
        };
        let tools = ToolFrameCodec::decode_frame(binary.payload()).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].frame_number, 1);
    }

    #[tokio::test]
    async fn test_log_transit_shows_error_replies() {
        let sink = RecordingSink::new();
        let mut dev = SimulatedDevice::vega("sim").with_log(Arc::new(sink.clone()));
        dev.set_log_transit(true);
        assert!(dev.initialize().await.is_err());

        dev.connect().await.unwrap();
        let handle = PortHandle::new("01");
        assert!(dev.port_enable(&handle).await.is_err());
        assert_eq!(
            sink.lines(),
            vec![
                ">> INIT",
                "<< Not connected",
                ">> CONNECT",
                "<< ()",
                ">> PENA 01",
                "<< PENA rejected by device: port not initialized",
            ]
        );
    }

    #[tokio::test]
    async fn test_port_search_fault() {
        let faults = Faults {
            port_search: true,
            ..Faults::none()
        };
        let mut dev = SimulatedDevice::vega("sim").with_faults(faults);
        dev.connect().await.unwrap();
        assert!(dev.port_handle_search(PortSearch::All).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_frame_period_disables_generator() {
        let mut dev = SimulatedDevice::vega("sim").with_frame_period(Duration::ZERO);
        let mut rx = dev.take_packet_stream().unwrap();
        dev.connect().await.unwrap();
        dev.initialize().await.unwrap();
        dev.tracking_start().await.unwrap();
        dev.stream_start("BX2 --6d=tools", "BX2").await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
        dev.stream_stop("BX2").await.unwrap();
    }

    #[tokio::test]
    async fn test_log_transit() {
        let sink = RecordingSink::new();
        let mut dev = SimulatedDevice::vega("sim").with_log(Arc::new(sink.clone()));
        dev.set_log_transit(true);
        dev.connect().await.unwrap();
        dev.api_revision().await.unwrap();
        assert!(sink.contains(">> APIREV"));
        assert!(sink.contains("<< \"G.003.123\""));
    }
}
