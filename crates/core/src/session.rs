//! Session lifecycle
//!
//! ```text
//! Disconnected -> Connected -> RevisionChecked -> Initialized -> PortsReady
//!   -> Tracking -> Streaming -> TrackingStoppedPending -> Disconnected
//! ```
//!
//! Each step either advances the phase or ends the run. Once connected,
//! every exit path goes through a single disconnect attempt.

use std::fmt;
use std::sync::Arc;

use crate::capability::supports_streaming;
use crate::config::SessionConfig;
use crate::error::{CapabilityError, CapiError, Result};
use crate::log::LogSink;
use crate::params::{ParameterConfigurator, ParameterWarning};
use crate::ports::PortSequencer;
use crate::protocol::{Capi, ToolDecoder, ToolFrameCodec};
use crate::streaming::{StreamCommand, StreamingController, ToolLogHandler};
use crate::types::Port;

/// Lifecycle phase of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connected,
    RevisionChecked,
    Initialized,
    PortsReady,
    Tracking,
    Streaming,
    TrackingStoppedPending,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a completed run observed
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub revision: String,
    pub final_phase: SessionPhase,
    pub enabled_ports: Vec<Port>,
    pub parameter_warnings: Vec<ParameterWarning>,
    pub packets_dispatched: u64,
    pub packets_skipped: u64,
}

/// One end-to-end device engagement
pub struct Session<C: Capi> {
    capi: C,
    config: SessionConfig,
    log: Arc<dyn LogSink>,
    decoder: Arc<dyn ToolDecoder>,
    phase: SessionPhase,
    history: Vec<SessionPhase>,
}

impl<C: Capi> Session<C> {
    pub fn new(capi: C, config: SessionConfig, log: Arc<dyn LogSink>) -> Self {
        Self {
            capi,
            config,
            log,
            decoder: Arc::new(ToolFrameCodec),
            phase: SessionPhase::Disconnected,
            history: vec![SessionPhase::Disconnected],
        }
    }

    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn ToolDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Every phase entered, in order, starting with `Disconnected`
    pub fn history(&self) -> &[SessionPhase] {
        &self.history
    }

    pub fn transport(&self) -> &C {
        &self.capi
    }

    pub fn into_transport(self) -> C {
        self.capi
    }

    /// Run the whole session. Returns the first fatal error, after the
    /// disconnect attempt.
    pub async fn run(&mut self) -> Result<SessionReport> {
        self.capi.set_log_transit(self.config.log_transit);

        if let Err(source) = self.capi.connect().await {
            let info = self.capi.connection_info();
            self.log.log(&format!("Could not connect to {}", info));
            return Err(CapiError::Connect { info, source });
        }
        self.enter(SessionPhase::Connected);
        self.log.log("Connected");

        let mut report = SessionReport::default();
        let outcome = self.run_connected(&mut report).await;
        let disconnected = self.disconnect().await;

        match (outcome, disconnected) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                report.final_phase = self.phase;
                Ok(report)
            }
        }
    }

    async fn run_connected(&mut self, report: &mut SessionReport) -> Result<()> {
        report.revision = self.check_revision().await?;
        self.enter(SessionPhase::RevisionChecked);

        if let Err(e) = self.capi.initialize().await {
            self.log.log("Could not initialize.");
            return Err(CapiError::Initialization(e));
        }
        self.enter(SessionPhase::Initialized);
        self.log.log("Initialized");

        let configurator = ParameterConfigurator::new(self.log.clone());
        let names = self.config.parameter_names();
        report
            .parameter_warnings
            .extend(configurator.apply(&mut self.capi, &self.config.parameters).await);
        report
            .parameter_warnings
            .extend(configurator.read_back(&mut self.capi, &names).await);

        let mut sequencer = PortSequencer::new(self.log.clone());
        report.enabled_ports = sequencer
            .bring_up(&mut self.capi, self.config.tool_srom.as_deref())
            .await?;
        self.enter(SessionPhase::PortsReady);

        if let Err(source) = self.capi.tracking_start().await {
            self.log.log("Could not start tracking.");
            return Err(CapiError::TrackingControl {
                action: "start",
                source,
            });
        }
        self.enter(SessionPhase::Tracking);
        self.log.log("TrackingStarted");

        self.stream(report, &configurator, &names).await?;

        if let Err(source) = self.capi.tracking_stop().await {
            self.log.log("Could not stop tracking.");
            return Err(CapiError::TrackingControl {
                action: "stop",
                source,
            });
        }
        self.log.log("TrackingStopped");
        Ok(())
    }

    async fn check_revision(&mut self) -> Result<String> {
        let revision = match self.capi.api_revision().await {
            Ok(revision) => revision,
            Err(e) => {
                self.log.log("Could not read API revision.");
                return Err(CapiError::Revision(e));
            }
        };
        self.log.log(&format!("Revision:{}", revision));

        match supports_streaming(&revision) {
            Ok(true) => Ok(revision),
            Ok(false) => {
                self.log.log("Your position sensor does not support streaming.");
                self.log.log("Streaming requires CAPI version G.003 or newer.");
                Err(CapabilityError::Unsupported { revision }.into())
            }
            Err(e) => {
                self.log
                    .log(&format!("Could not interpret API revision: {}", e));
                Err(CapabilityError::Parse(e).into())
            }
        }
    }

    /// Start the stream, hold, stop it and drain trailing packets
    async fn stream(
        &mut self,
        report: &mut SessionReport,
        configurator: &ParameterConfigurator,
        names: &[String],
    ) -> Result<()> {
        let controller = StreamingController::new(self.decoder.clone(), self.log.clone());
        let cmd = match controller
            .start_streaming(
                &mut self.capi,
                &self.config.stream_command,
                &self.config.stream_tag,
            )
            .await
        {
            Ok(cmd) => cmd,
            Err(e) => {
                self.log.log(&format!("Could not start streaming: {}", e));
                return Err(e);
            }
        };
        self.enter(SessionPhase::Streaming);
        let handler = Arc::new(ToolLogHandler::new(self.log.clone()));
        if !controller.register_listener(&cmd, handler).await {
            self.log
                .log(&format!("Could not register tool listener on stream {}.", cmd.tag()));
            tracing::warn!(tag = cmd.tag(), "listener refused, stream no longer active");
        }

        let dispatcher = match self.capi.take_packet_stream() {
            Some(packets) => Some(controller.spawn_dispatcher(packets)),
            None => {
                self.log.log("Transport does not deliver stream packets.");
                None
            }
        };

        let held = self
            .hold_and_stop(&controller, &cmd, configurator, names, report)
            .await;

        if let Some(task) = dispatcher {
            task.abort();
        }
        report.packets_dispatched = controller.packets_dispatched();
        report.packets_skipped = controller.packets_skipped();
        tracing::debug!(
            dispatched = report.packets_dispatched,
            skipped = report.packets_skipped,
            "stream finished"
        );
        held
    }

    async fn hold_and_stop(
        &mut self,
        controller: &StreamingController,
        cmd: &StreamCommand,
        configurator: &ParameterConfigurator,
        names: &[String],
        report: &mut SessionReport,
    ) -> Result<()> {
        tokio::time::sleep(self.config.dwell()).await;
        report
            .parameter_warnings
            .extend(configurator.read_back(&mut self.capi, names).await);
        tokio::time::sleep(self.config.dwell()).await;

        if let Err(e) = controller.stop_streaming(&mut self.capi, cmd).await {
            self.log.log(&format!("Could not stop streaming: {}", e));
            return Err(e);
        }
        self.enter(SessionPhase::TrackingStoppedPending);
        tokio::time::sleep(self.config.drain()).await;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let result = self.capi.disconnect().await;
        self.enter(SessionPhase::Disconnected);
        match result {
            Ok(()) => {
                self.log.log("Disconnected");
                Ok(())
            }
            Err(e) => {
                self.log.log("Could not disconnect.");
                Err(CapiError::Disconnect(e))
            }
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        tracing::debug!(from = %self.phase, to = %phase, "session phase");
        self.phase = phase;
        self.history.push(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FRAME_FREQUENCY_PARAM;
    use crate::error::{DeviceError, ParseError};
    use crate::log::RecordingSink;
    use crate::simulator::{Faults, SimulatedDevice};
    use crate::types::{PortHandle, PortState, StreamPacket, ToolRecord, Transform};
    use std::time::Duration;

    use SessionPhase::*;

    fn session(dev: SimulatedDevice, sink: &RecordingSink) -> Session<SimulatedDevice> {
        Session::new(dev, SessionConfig::default(), Arc::new(sink.clone()))
    }

    fn last_call(session: &Session<SimulatedDevice>) -> &str {
        session
            .transport()
            .calls()
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_visits_every_phase() {
        let sink = RecordingSink::new();
        let dev = SimulatedDevice::vega("sim").with_frame_period(Duration::from_millis(500));
        let mut session = session(dev, &sink);

        let report = session.run().await.unwrap();

        assert_eq!(
            session.history(),
            [
                Disconnected,
                Connected,
                RevisionChecked,
                Initialized,
                PortsReady,
                Tracking,
                Streaming,
                TrackingStoppedPending,
                Disconnected,
            ]
        );
        assert_eq!(report.revision, "G.003.123");
        assert_eq!(report.final_phase, Disconnected);
        assert_eq!(report.enabled_ports.len(), 3);
        assert!(report.parameter_warnings.is_empty());
        assert!(report.packets_dispatched > 0);
        assert!(!session.transport().is_connected());
        assert!(session.transport().active_streams().is_empty());
        for expected in ["Connected", "Initialized", "TrackingStarted", "TrackingStopped", "Disconnected"] {
            assert!(sink.lines().iter().any(|l| l == expected), "missing {expected}");
        }
        assert!(sink.contains("frame="));
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_packets_dispatched_and_skipped() {
        let sink = RecordingSink::new();
        let dev = SimulatedDevice::vega("sim");
        let injector = dev.injector();
        let frame = ToolFrameCodec::encode(&[
            ToolRecord::tracked(PortHandle::new("01"), 9, Transform::identity()),
            ToolRecord::tracked(PortHandle::new("02"), 9, Transform::identity()),
        ])
        .unwrap();
        injector.send(StreamPacket::binary("BX2", frame.clone())).await.unwrap();
        injector.send(StreamPacket::binary("OTHER", frame)).await.unwrap();

        let mut session = session(dev, &sink);
        let report = session.run().await.unwrap();

        assert_eq!(report.packets_dispatched, 1);
        assert_eq!(report.packets_skipped, 1);
        assert_eq!(sink.count_containing("frame=9"), 2);
        assert_eq!(sink.count_containing("\"OTHER\""), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_makes_no_further_calls() {
        let sink = RecordingSink::new();
        let faults = Faults {
            connect: true,
            ..Faults::none()
        };
        let mut session = session(SimulatedDevice::vega("10.0.0.9").with_faults(faults), &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, CapiError::Connect { ref info, .. } if info.contains("10.0.0.9")));
        assert_eq!(session.transport().calls(), ["CONNECT"]);
        assert_eq!(session.history(), [Disconnected]);
        assert!(sink.contains("Could not connect to 10.0.0.9"));
    }

    #[tokio::test]
    async fn test_unsupported_revision_disconnects() {
        let sink = RecordingSink::new();
        let dev = SimulatedDevice::vega("sim").with_revision("G.002.999");
        let mut session = session(dev, &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(
            err,
            CapiError::Capability(CapabilityError::Unsupported { .. })
        ));
        assert_eq!(session.transport().calls(), ["CONNECT", "APIREV", "DISCONNECT"]);
        assert!(sink.contains("does not support streaming"));
        assert_eq!(session.phase(), Disconnected);
    }

    #[tokio::test]
    async fn test_malformed_revision_is_parse_error() {
        let sink = RecordingSink::new();
        let dev = SimulatedDevice::vega("sim").with_revision("X");
        let mut session = session(dev, &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(
            err,
            CapiError::Capability(CapabilityError::Parse(ParseError::TooShort { .. }))
        ));
        assert_eq!(last_call(&session), "DISCONNECT");
    }

    #[tokio::test]
    async fn test_initialize_failure() {
        let sink = RecordingSink::new();
        let faults = Faults {
            initialize: true,
            ..Faults::none()
        };
        let mut session = session(SimulatedDevice::vega("sim").with_faults(faults), &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, CapiError::Initialization(_)));
        assert!(sink.contains("Could not initialize."));
        assert_eq!(session.transport().calls(), ["CONNECT", "APIREV", "INIT", "DISCONNECT"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_parameter_is_not_fatal() {
        let sink = RecordingSink::new();
        let faults = Faults::none().reject_parameter(FRAME_FREQUENCY_PARAM);
        let mut session = session(SimulatedDevice::vega("sim").with_faults(faults), &sink);

        let report = session.run().await.unwrap();
        assert_eq!(report.parameter_warnings.len(), 1);
        let get_frame = format!("GET {}", FRAME_FREQUENCY_PARAM);
        let reads = session
            .transport()
            .calls()
            .iter()
            .filter(|c| **c == get_frame)
            .count();
        assert_eq!(reads, 2);
        assert_eq!(sink.count_containing("Param.Tracking.Frame Frequency=60"), 2);
    }

    #[tokio::test]
    async fn test_port_failure_skips_tracking() {
        let sink = RecordingSink::new();
        let faults = Faults {
            port_enable: Some(PortHandle::new("02")),
            ..Faults::none()
        };
        let mut session = session(SimulatedDevice::vega("sim").with_faults(faults), &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, CapiError::PortBringup { .. }));
        assert!(!session.transport().calls().iter().any(|c| c == "TSTART"));
        assert_eq!(last_call(&session), "DISCONNECT");
        assert_eq!(session.transport().port_state("01"), Some(PortState::Enabled));
    }

    #[tokio::test]
    async fn test_port_search_failure_logs_reason() {
        let sink = RecordingSink::new();
        let faults = Faults {
            port_search: true,
            ..Faults::none()
        };
        let dev = SimulatedDevice::vega("sim").with_faults(faults);
        let mut session = Session::new(
            dev,
            SessionConfig {
                tool_srom: None,
                ..SessionConfig::default()
            },
            Arc::new(sink.clone()),
        );

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, CapiError::PortSearch(_)));
        let lines = sink.lines();
        let n = lines.len();
        assert!(lines[n - 2].starts_with("Could not search ports (not-initialized)"));
        assert_eq!(lines[n - 1], "Disconnected");
        assert_eq!(last_call(&session), "DISCONNECT");
    }

    #[tokio::test]
    async fn test_tracking_start_failure() {
        let sink = RecordingSink::new();
        let faults = Faults {
            tracking_start: true,
            ..Faults::none()
        };
        let mut session = session(SimulatedDevice::vega("sim").with_faults(faults), &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, CapiError::TrackingControl { action: "start", .. }));
        assert!(sink.contains("Could not start tracking."));
        assert!(!session.transport().calls().iter().any(|c| c.starts_with("STREAM")));
    }

    #[tokio::test]
    async fn test_stream_start_failure_only_disconnects() {
        let sink = RecordingSink::new();
        let faults = Faults {
            stream_start: true,
            ..Faults::none()
        };
        let mut session = session(SimulatedDevice::vega("sim").with_faults(faults), &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, CapiError::StreamStart { .. }));
        let calls = session.transport().calls();
        assert!(calls[calls.len() - 2].starts_with("STREAM"));
        assert_eq!(calls[calls.len() - 1], "DISCONNECT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_stop_failure_still_disconnects() {
        let sink = RecordingSink::new();
        let faults = Faults {
            tracking_stop: true,
            ..Faults::none()
        };
        let mut session = session(SimulatedDevice::vega("sim").with_faults(faults), &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, CapiError::TrackingControl { action: "stop", .. }));
        assert!(sink.contains("Could not stop tracking."));
        assert_eq!(last_call(&session), "DISCONNECT");
        assert!(!session.transport().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_failure_reported() {
        let sink = RecordingSink::new();
        let faults = Faults {
            disconnect: true,
            ..Faults::none()
        };
        let mut session = session(SimulatedDevice::vega("sim").with_faults(faults), &sink);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, CapiError::Disconnect(DeviceError::Io(_))));
        assert!(sink.contains("Could not disconnect."));
        assert_eq!(session.phase(), Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_and_drain_timing() {
        let sink = RecordingSink::new();
        let config = SessionConfig::default().with_timing(2_000, 300);
        let mut session = Session::new(SimulatedDevice::vega("sim"), config, Arc::new(sink.clone()));

        let started = tokio::time::Instant::now();
        session.run().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(4_300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(4_400), "{elapsed:?}");
    }
}
