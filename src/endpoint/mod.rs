
pub mod serial;
pub mod tcp_client;
pub mod tcp_server;
pub mod udp_client;
pub mod udp_server;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portable_atomic::{AtomicU8, Ordering};

use crate::config::EndpointConfig;
use crate::error::Result;
use crate::logging::ChannelLogger;

pub use serial::SerialEndpoint;
pub use tcp_client::TcpClientEndpoint;
pub use tcp_server::TcpServerEndpoint;
pub use udp_client::UdpClientEndpoint;
pub use udp_server::UdpServerEndpoint;

/// Read size for stream endpoints (TCP, serial) and for stream-direction
/// drain chunks.
pub const READ_BUF_SIZE: usize = 4096;

/// Read size for datagram endpoints; large enough that any UDP datagram is
/// received, delivered and forwarded intact.
pub const DATAGRAM_BUF_SIZE: usize = 65536;

/// Cool-down between TCP client connect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Connection state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EndpointState {
    #[default]
    Disconnected = 0,
    Connecting,
    Connected,
    Error,
}

impl From<u8> for EndpointState {
    fn from(v: u8) -> Self {
        match v {
            1 => EndpointState::Connecting,
            2 => EndpointState::Connected,
            3 => EndpointState::Error,
            _ => EndpointState::Disconnected,
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointState::Disconnected => "DISCONNECTED",
            EndpointState::Connecting => "CONNECTING",
            EndpointState::Connected => "CONNECTED",
            EndpointState::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Shared atomic cell holding an [`EndpointState`], clonable into driver
/// tasks.
#[derive(Debug, Clone, Default)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> EndpointState {
        self.0.load(Ordering::Acquire).into()
    }

    pub(crate) fn set(&self, state: EndpointState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Receiver for inbound bytes. The channel installs one per endpoint before
/// `open()`; endpoints never hold a reference back to the channel.
pub trait DataSink: Send + Sync {
    fn on_data(&self, data: &[u8]);
}

/// A bidirectional byte port over one of the five supported transports.
///
/// All drivers share the same lifecycle: `open` starts the driver tasks,
/// `close` stops them and releases OS resources, `write` enqueues bytes
/// best-effort and returns promptly without confirming delivery.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Starts the driver. Idempotent: reopening an open endpoint just
    /// reports whether it is currently connected.
    async fn open(&self) -> Result<bool>;

    /// Stops the driver and transitions to `Disconnected`. Idempotent.
    async fn close(&self);

    /// Transmits `data` best-effort. Depending on the driver, bytes may be
    /// dropped (and logged) when the endpoint is not connected.
    async fn write(&self, data: &[u8]);

    /// Installs the inbound sink. Must happen before `open()`; later calls
    /// do not affect a running driver.
    fn set_data_sink(&self, sink: Arc<dyn DataSink>);

    fn state(&self) -> EndpointState;

    /// Short human-readable identity, e.g. `TcpServer:9100`.
    fn info(&self) -> String;
}

/// Builds the driver for an endpoint configuration.
pub fn create_endpoint(config: &EndpointConfig, logger: ChannelLogger) -> Arc<dyn Endpoint> {
    match config {
        EndpointConfig::TcpServer { port } => Arc::new(TcpServerEndpoint::new(*port, logger)),
        EndpointConfig::TcpClient { ip, port } => {
            Arc::new(TcpClientEndpoint::new(ip.clone(), *port, logger))
        }
        EndpointConfig::UdpServer { port } => Arc::new(UdpServerEndpoint::new(*port, logger)),
        EndpointConfig::UdpClient { ip, port } => {
            Arc::new(UdpClientEndpoint::new(ip.clone(), *port, logger))
        }
        EndpointConfig::Serial {
            serial_port,
            baud_rate,
        } => Arc::new(SerialEndpoint::new(serial_port.clone(), *baud_rate, logger)),
    }
}

/// True when the endpoint kind is message-oriented, i.e. chunk boundaries
/// crossing the forwarder are datagram boundaries that must be preserved.
pub fn is_datagram(config: &EndpointConfig) -> bool {
    matches!(
        config,
        EndpointConfig::UdpServer { .. } | EndpointConfig::UdpClient { .. }
    )
}
