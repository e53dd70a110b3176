#[cfg(test)]
#[path = "udp_client_test.rs"]
mod udp_client_test;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex as AsyncMutex};

use super::{DataSink, Endpoint, EndpointState, StateHandle, DATAGRAM_BUF_SIZE};
use crate::error::Result;
use crate::logging::ChannelLogger;

/// UDP endpoint sending to one fixed target.
///
/// The socket binds an ephemeral local port; each `write` leaves as a single
/// datagram toward the configured address and each inbound datagram is
/// delivered intact through the sink.
pub struct UdpClientEndpoint {
    ip: String,
    port: u16,
    state: StateHandle,
    sink: Mutex<Option<Arc<dyn DataSink>>>,
    logger: ChannelLogger,
    socket: AsyncMutex<Option<Arc<UdpSocket>>>,
    closed_watch_tx: AsyncMutex<Option<watch::Sender<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UdpClientEndpoint {
    pub fn new(ip: String, port: u16, logger: ChannelLogger) -> Self {
        UdpClientEndpoint {
            ip,
            port,
            state: StateHandle::new(),
            sink: Mutex::new(None),
            logger,
            socket: AsyncMutex::new(None),
            closed_watch_tx: AsyncMutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Actual local address, available while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    async fn read_loop(
        socket: Arc<UdpSocket>,
        sink: Option<Arc<dyn DataSink>>,
        logger: ChannelLogger,
        mut closed_rx: watch::Receiver<()>,
    ) {
        let mut buf = vec![0u8; DATAGRAM_BUF_SIZE];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, _raddr)) => {
                            if let Some(sink) = &sink {
                                sink.on_data(&buf[..n]);
                            }
                        }
                        Err(err) => {
                            logger.error(&format!("recv error: {err}"));
                        }
                    }
                }
                _ = closed_rx.changed() => break,
            }
        }
    }
}

#[async_trait]
impl Endpoint for UdpClientEndpoint {
    async fn open(&self) -> Result<bool> {
        let mut closed_tx = self.closed_watch_tx.lock().await;
        if closed_tx.is_some() {
            return Ok(self.state.get() == EndpointState::Connected);
        }

        self.state.set(EndpointState::Connecting);
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => Arc::new(socket),
            Err(err) => {
                self.state.set(EndpointState::Error);
                self.logger.error(&format!("socket setup failed: {err}"));
                return Err(err.into());
            }
        };

        *self.local_addr.lock() = Some(socket.local_addr()?);
        *self.socket.lock().await = Some(Arc::clone(&socket));

        let (tx, rx) = watch::channel(());
        *closed_tx = Some(tx);
        self.state.set(EndpointState::Connected);
        self.logger
            .info(&format!("udp client ready for {}:{}", self.ip, self.port));

        let sink = self.sink.lock().clone();
        tokio::spawn(Self::read_loop(socket, sink, self.logger.clone(), rx));

        Ok(true)
    }

    async fn close(&self) {
        self.closed_watch_tx.lock().await.take();
        *self.socket.lock().await = None;
        *self.local_addr.lock() = None;
        self.state.set(EndpointState::Disconnected);
    }

    async fn write(&self, data: &[u8]) {
        let socket = self.socket.lock().await.clone();
        let Some(socket) = socket else {
            self.logger
                .warn(&format!("not open, dropped {} bytes", data.len()));
            return;
        };

        match socket.send_to(data, (self.ip.as_str(), self.port)).await {
            Ok(n) if n < data.len() => {
                self.logger
                    .warn(&format!("incomplete send: {n}/{} bytes", data.len()));
            }
            Ok(_) => {}
            Err(err) => {
                self.logger.error(&format!("send failed: {err}"));
            }
        }
    }

    fn set_data_sink(&self, sink: Arc<dyn DataSink>) {
        *self.sink.lock() = Some(sink);
    }

    fn state(&self) -> EndpointState {
        self.state.get()
    }

    fn info(&self) -> String {
        format!("UdpClient:{}:{}", self.ip, self.port)
    }
}
