//! Stream subscriptions and packet dispatch
//!
//! A [`StreamingController`] starts and stops streams on the device and
//! fans decoded frames out to the listeners registered on each
//! [`StreamCommand`].
//!
//! Listeners run synchronously inside dispatch, in registration order,
//! once per frame. A listener that blocks stalls delivery of every later
//! packet, so handlers must return promptly.
//!
//! Stopping a stream flips its active flag before the stop command is
//! sent. A packet already past the tag lookup when that happens is still
//! delivered, so listeners may see at most one trailing frame.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{CapiError, DeviceError, Result};
use crate::log::LogSink;
use crate::protocol::{Capi, ToolDecoder};
use crate::types::{Packet, StreamPacket, ToolRecord};

/// Consumer of decoded frames
pub trait PacketHandler: Send + Sync {
    fn on_tools(&self, tools: &[ToolRecord]);
}

impl<F> PacketHandler for F
where
    F: Fn(&[ToolRecord]) + Send + Sync,
{
    fn on_tools(&self, tools: &[ToolRecord]) {
        self(tools)
    }
}

/// Logs every tool of every frame, one line each
pub struct ToolLogHandler {
    log: Arc<dyn LogSink>,
}

impl ToolLogHandler {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self { log }
    }
}

impl PacketHandler for ToolLogHandler {
    fn on_tools(&self, tools: &[ToolRecord]) {
        for tool in tools {
            self.log.log(&tool.to_string());
        }
    }
}

struct CommandState {
    command: String,
    tag: String,
    listeners: Mutex<Vec<Arc<dyn PacketHandler>>>,
    active: AtomicBool,
}

/// Handle to one stream subscription
///
/// Cheap to clone; all clones refer to the same subscription.
#[derive(Clone)]
pub struct StreamCommand {
    inner: Arc<CommandState>,
}

impl StreamCommand {
    fn new(command: &str, tag: &str) -> Self {
        Self {
            inner: Arc::new(CommandState {
                command: command.to_string(),
                tag: tag.to_string(),
                listeners: Mutex::new(Vec::new()),
                active: AtomicBool::new(true),
            }),
        }
    }

    pub fn command(&self) -> &str {
        &self.inner.command
    }

    /// Correlation tag stamped on this stream's packets
    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub async fn listener_count(&self) -> usize {
        self.inner.listeners.lock().await.len()
    }

    fn same(&self, other: &StreamCommand) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for StreamCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCommand")
            .field("command", &self.inner.command)
            .field("tag", &self.inner.tag)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Why a packet was discarded without reaching any listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchSkip {
    UnknownStream { tag: String },
    UnexpectedKind { tag: String, kind: String },
    Invalid { tag: String, kind: String },
    Undecodable { tag: String, error: DeviceError },
}

impl fmt::Display for DispatchSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStream { tag } => {
                write!(f, "Ignoring packet for stream {:?}: no active stream.", tag)
            }
            Self::UnexpectedKind { kind, .. } => write!(f, "Got {}. Expected BinaryPacket.", kind),
            Self::Invalid { kind, .. } => write!(f, "Invalid {} received.", kind),
            Self::Undecodable { tag, error } => {
                write!(f, "Could not decode frame on stream {:?}: {}", tag, error)
            }
        }
    }
}

/// Result of dispatching one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { tools: usize, listeners: usize },
    Skipped(DispatchSkip),
}

struct ControllerState {
    decoder: Arc<dyn ToolDecoder>,
    log: Arc<dyn LogSink>,
    active: Mutex<Vec<StreamCommand>>,
    dispatched: AtomicU64,
    skipped: AtomicU64,
}

/// Starts, feeds and stops stream subscriptions
///
/// Cheap to clone; the dispatcher task holds its own clone.
#[derive(Clone)]
pub struct StreamingController {
    inner: Arc<ControllerState>,
}

impl StreamingController {
    pub fn new(decoder: Arc<dyn ToolDecoder>, log: Arc<dyn LogSink>) -> Self {
        Self {
            inner: Arc::new(ControllerState {
                decoder,
                log,
                active: Mutex::new(Vec::new()),
                dispatched: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }),
        }
    }

    /// Send the start command and register the new subscription
    pub async fn start_streaming<C: Capi + ?Sized>(
        &self,
        capi: &mut C,
        command: &str,
        tag: &str,
    ) -> Result<StreamCommand> {
        if self.find(tag).await.is_some() {
            return Err(CapiError::StreamStart {
                command: command.to_string(),
                source: DeviceError::rejected("STREAM", format!("tag {:?} already active", tag)),
            });
        }

        capi.stream_start(command, tag)
            .await
            .map_err(|source| CapiError::StreamStart {
                command: command.to_string(),
                source,
            })?;

        let cmd = StreamCommand::new(command, tag);
        self.inner.active.lock().await.push(cmd.clone());
        tracing::debug!(command, tag, "stream started");
        Ok(cmd)
    }

    /// Append a listener. Returns `false` if the subscription is already stopped.
    pub async fn register_listener(
        &self,
        cmd: &StreamCommand,
        handler: Arc<dyn PacketHandler>,
    ) -> bool {
        let mut listeners = cmd.inner.listeners.lock().await;
        if !cmd.is_active() {
            return false;
        }
        listeners.push(handler);
        true
    }

    /// Stop a subscription. Stopping an already stopped one is a no-op.
    pub async fn stop_streaming<C: Capi + ?Sized>(
        &self,
        capi: &mut C,
        cmd: &StreamCommand,
    ) -> Result<()> {
        if !cmd.inner.active.swap(false, Ordering::AcqRel) {
            tracing::debug!(tag = cmd.tag(), "stream already stopped");
            return Ok(());
        }
        self.inner.active.lock().await.retain(|c| !c.same(cmd));

        capi.stream_stop(cmd.tag())
            .await
            .map_err(|source| CapiError::StreamStop {
                tag: cmd.tag().to_string(),
                source,
            })?;
        tracing::debug!(tag = cmd.tag(), "stream stopped");
        Ok(())
    }

    /// Route one packet to its subscription's listeners
    pub async fn dispatch(&self, packet: StreamPacket) -> DispatchOutcome {
        let StreamPacket { tag, packet } = packet;

        let cmd = match self.find(&tag).await {
            Some(cmd) => cmd,
            None => return self.skip(DispatchSkip::UnknownStream { tag }),
        };

        let binary = match packet {
            Packet::Binary(binary) if binary.is_valid() => binary,
            Packet::Binary(_) => {
                return self.skip(DispatchSkip::Invalid {
                    tag,
                    kind: "BinaryPacket".into(),
                })
            }
            Packet::Invalid { reason } => {
                tracing::debug!(%tag, %reason, "unframeable packet");
                return self.skip(DispatchSkip::Invalid {
                    tag,
                    kind: "InvalidPacket".into(),
                });
            }
            Packet::Other { kind, .. } => {
                return self.skip(DispatchSkip::UnexpectedKind { tag, kind })
            }
        };

        let tools = match self.inner.decoder.decode(&binary) {
            Ok(tools) => tools,
            Err(error) => return self.skip(DispatchSkip::Undecodable { tag, error }),
        };

        // Snapshot so registration is never blocked behind a listener
        let listeners = cmd.inner.listeners.lock().await.clone();
        for listener in &listeners {
            listener.on_tools(&tools);
        }

        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%tag, tools = tools.len(), listeners = listeners.len(), "frame dispatched");
        DispatchOutcome::Delivered {
            tools: tools.len(),
            listeners: listeners.len(),
        }
    }

    /// Dispatch every packet from `packets`, in arrival order, until the
    /// sender side closes
    pub async fn run_dispatcher(self, mut packets: mpsc::Receiver<StreamPacket>) {
        while let Some(packet) = packets.recv().await {
            self.dispatch(packet).await;
        }
        tracing::debug!("packet stream closed, dispatcher exiting");
    }

    pub fn spawn_dispatcher(&self, packets: mpsc::Receiver<StreamPacket>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_dispatcher(packets))
    }

    /// Packets delivered to listeners so far
    pub fn packets_dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    /// Packets discarded so far
    pub fn packets_skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    pub async fn active_streams(&self) -> Vec<StreamCommand> {
        self.inner.active.lock().await.clone()
    }

    async fn find(&self, tag: &str) -> Option<StreamCommand> {
        self.inner
            .active
            .lock()
            .await
            .iter()
            .find(|c| c.tag() == tag && c.is_active())
            .cloned()
    }

    fn skip(&self, reason: DispatchSkip) -> DispatchOutcome {
        self.inner.skipped.fetch_add(1, Ordering::Relaxed);
        self.inner.log.log(&reason.to_string());
        DispatchOutcome::Skipped(reason)
    }
}
