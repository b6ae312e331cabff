//! Streaming client for CAPI position sensors
//! Connects, brings up tool ports, streams 6D tool frames for a while, then
//! shuts everything down again.

mod discovery;
mod usage;

use anyhow::{Context, Result};
use capi_core::config::FRAME_FREQUENCY_PARAM;
use capi_core::{
    discover_host, CapiError, ConsoleSink, LogSink, Session, SessionConfig, SimulatedDevice,
};
use clap::Parser;
use discovery::MdnsResolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use usage::{classify, print_usage, Target};

const PROGRAM: &str = "capi-stream";
const DEFAULT_FRAME_HZ: u32 = 60;
const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

#[derive(Parser, Debug)]
#[command(name = "capi-stream")]
#[command(author = "CAPI Stream Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stream tool frames from a CAPI position sensor", long_about = None)]
#[command(disable_help_flag = true)]
struct Args {
    /// Device hostname or IP address (discovered over mDNS when absent)
    #[arg(allow_hyphen_values = true)]
    host: Option<String>,

    /// Session configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Log every command sent to the device and every reply
    #[arg(long, default_value = "false")]
    log_transit: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let console = ConsoleSink::new(capi_core::config::DEFAULT_LOG_TAG);
            console.log(e.to_string().trim_end());
            print_usage(&console, PROGRAM);
            return Ok(());
        }
    };

    setup_logging(&args.log_level)?;

    let mut config = load_config(args.config.as_deref())?;
    config.log_transit |= args.log_transit;

    let console: Arc<dyn LogSink> = Arc::new(ConsoleSink::new(config.log_tag.clone()));
    console.log(&format!("CAPI Stream v{}", capi_core::version()));

    let host = match classify(args.host.as_deref()) {
        Target::Host(host) => host,
        Target::Help => {
            print_usage(console.as_ref(), PROGRAM);
            return Ok(());
        }
        Target::Discover => {
            console.log("Finding a measurement device on the network.");
            match discover_host(&MdnsResolver, &config.service_name, config.discovery_timeout()).await {
                Some(host) => host,
                None => {
                    console.log("Could not find a measurement device on the network.");
                    console.log("Could not automatically detect a device, please manually specify one.");
                    print_usage(console.as_ref(), PROGRAM);
                    return Ok(());
                }
            }
        }
    };

    let device = SimulatedDevice::vega(host)
        .with_frame_period(frame_period(&config))
        .with_log(console.clone());
    stream_from(device, config, console).await;

    Ok(())
}

/// Run one session; returns whether it completed
async fn stream_from(device: SimulatedDevice, config: SessionConfig, console: Arc<dyn LogSink>) -> bool {
    let mut session = Session::new(device, config, console.clone());
    match session.run().await {
        Ok(report) => {
            tracing::info!(
                ports = report.enabled_ports.len(),
                warnings = report.parameter_warnings.len(),
                dispatched = report.packets_dispatched,
                skipped = report.packets_skipped,
                "Session complete"
            );
            true
        }
        Err(CapiError::Connect { .. }) => {
            print_usage(console.as_ref(), PROGRAM);
            false
        }
        Err(e) => {
            tracing::warn!("Session aborted: {}", e);
            false
        }
    }
}

/// Explicit path, then the per-user config file, then defaults
fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    if let Some(path) = path {
        return SessionConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    if let Some(path) = default_config_path().filter(|p| p.exists()) {
        tracing::debug!("Loading config from {}", path.display());
        return SessionConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    Ok(SessionConfig::default())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(PROGRAM).join("session.json"))
}

/// Simulated frame period matching the configured frame frequency, at most 1 kHz
fn frame_period(config: &SessionConfig) -> Duration {
    let hz = config
        .parameters
        .iter()
        .find(|p| p.name == FRAME_FREQUENCY_PARAM)
        .and_then(|p| p.value.trim().parse::<u32>().ok())
        .filter(|hz| *hz > 0)
        .unwrap_or(DEFAULT_FRAME_HZ);
    (Duration::from_secs(1) / hz).max(MIN_FRAME_PERIOD)
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use capi_core::{Faults, ParameterSetting, RecordingSink};

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["capi-stream"]).unwrap();
        assert!(args.host.is_none());
        assert_eq!(args.log_level, "warn");
        assert!(!args.log_transit);
    }

    #[test]
    fn test_args_host_and_options() {
        let args = Args::try_parse_from([
            "capi-stream",
            "169.254.8.50",
            "--log-level",
            "debug",
            "--log-transit",
        ])
        .unwrap();
        assert_eq!(args.host.as_deref(), Some("169.254.8.50"));
        assert_eq!(args.log_level, "debug");
        assert!(args.log_transit);
    }

    #[test]
    fn test_help_word_is_positional() {
        let args = Args::try_parse_from(["capi-stream", "/?"]).unwrap();
        assert_eq!(classify(args.host.as_deref()), Target::Help);
    }

    #[test]
    fn test_frame_period_follows_frequency() {
        let mut config = SessionConfig::default();
        assert_eq!(frame_period(&config), Duration::from_secs(1) / 60);

        config.parameters = vec![ParameterSetting::new(FRAME_FREQUENCY_PARAM, "20")];
        assert_eq!(frame_period(&config), Duration::from_millis(50));

        config.parameters = vec![ParameterSetting::new(FRAME_FREQUENCY_PARAM, "fast")];
        assert_eq!(frame_period(&config), Duration::from_secs(1) / DEFAULT_FRAME_HZ);
    }

    #[test]
    fn test_frame_period_never_zero() {
        let mut config = SessionConfig::default();
        config.parameters = vec![ParameterSetting::new(FRAME_FREQUENCY_PARAM, "2000000000")];
        assert_eq!(frame_period(&config), MIN_FRAME_PERIOD);

        config.parameters = vec![ParameterSetting::new(FRAME_FREQUENCY_PARAM, "0")];
        assert_eq!(frame_period(&config), Duration::from_secs(1) / DEFAULT_FRAME_HZ);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_frequency_still_streams() {
        let sink = RecordingSink::new();
        let mut config = SessionConfig::default().with_timing(20, 5);
        config.parameters = vec![ParameterSetting::new(FRAME_FREQUENCY_PARAM, "2000000000")];
        let device = SimulatedDevice::vega("sim").with_frame_period(frame_period(&config));

        assert!(stream_from(device, config, Arc::new(sink.clone())).await);
        assert!(sink.contains("frame="));
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let err = load_config(Some(Path::new("/nonexistent/capi/session.json"))).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_completes_against_simulator() {
        let sink = RecordingSink::new();
        let config = SessionConfig::default().with_timing(200, 50);
        let device = SimulatedDevice::vega("sim").with_frame_period(Duration::from_millis(20));

        assert!(stream_from(device, config, Arc::new(sink.clone())).await);
        assert!(sink.contains("TrackingStopped"));
        assert!(sink.contains("frame="));
    }

    #[tokio::test]
    async fn test_connect_failure_prints_usage() {
        let sink = RecordingSink::new();
        let faults = Faults {
            connect: true,
            ..Faults::none()
        };
        let device = SimulatedDevice::vega("P9-B0103.local").with_faults(faults);

        assert!(!stream_from(device, SessionConfig::default(), Arc::new(sink.clone())).await);
        assert!(sink.contains("Could not connect to P9-B0103.local"));
        assert!(sink.contains("usage: capi-stream [<hostname>]"));
    }
}
