#[cfg(test)]
#[path = "udp_server_test.rs"]
mod udp_server_test;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex as AsyncMutex};

use super::{DataSink, Endpoint, EndpointState, StateHandle, DATAGRAM_BUF_SIZE};
use crate::error::Result;
use crate::logging::ChannelLogger;

type PeerMap = Arc<AsyncMutex<HashMap<String, SocketAddr>>>;

/// Bound UDP endpoint serving any number of peers.
///
/// Every sender of a datagram is registered in the peer table (keyed by its
/// `ip:port` identity) and outbound writes fan out as one datagram per known
/// peer. Peers are never evicted while the endpoint is open. Each received
/// datagram is delivered through the sink as one call; datagrams are never
/// coalesced.
pub struct UdpServerEndpoint {
    port: u16,
    state: StateHandle,
    sink: Mutex<Option<Arc<dyn DataSink>>>,
    logger: ChannelLogger,
    socket: AsyncMutex<Option<Arc<UdpSocket>>>,
    peers: PeerMap,
    closed_watch_tx: AsyncMutex<Option<watch::Sender<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UdpServerEndpoint {
    pub fn new(port: u16, logger: ChannelLogger) -> Self {
        UdpServerEndpoint {
            port,
            state: StateHandle::new(),
            sink: Mutex::new(None),
            logger,
            socket: AsyncMutex::new(None),
            peers: Arc::new(AsyncMutex::new(HashMap::new())),
            closed_watch_tx: AsyncMutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Actual bound address, available while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    async fn read_loop(
        socket: Arc<UdpSocket>,
        peers: PeerMap,
        sink: Option<Arc<dyn DataSink>>,
        logger: ChannelLogger,
        mut closed_rx: watch::Receiver<()>,
    ) {
        let mut buf = vec![0u8; DATAGRAM_BUF_SIZE];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, raddr)) => {
                            {
                                let mut peers = peers.lock().await;
                                if peers.insert(raddr.to_string(), raddr).is_none() {
                                    logger.info(&format!("new peer {raddr}"));
                                }
                            }
                            // one datagram, one sink call
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
impl Endpoint for UdpServerEndpoint {
    async fn open(&self) -> Result<bool> {
        let mut closed_tx = self.closed_watch_tx.lock().await;
        if closed_tx.is_some() {
            return Ok(self.state.get() == EndpointState::Connected);
        }

        self.state.set(EndpointState::Connecting);
        let socket = match UdpSocket::bind(("0.0.0.0", self.port)).await {
            Ok(socket) => Arc::new(socket),
            Err(err) => {
                self.state.set(EndpointState::Error);
                self.logger
                    .error(&format!("bind to port {} failed: {err}", self.port));
                return Err(err.into());
            }
        };

        let local = socket.local_addr()?;
        *self.local_addr.lock() = Some(local);
        *self.socket.lock().await = Some(Arc::clone(&socket));

        let (tx, rx) = watch::channel(());
        *closed_tx = Some(tx);
        self.state.set(EndpointState::Connected);
        self.logger.info(&format!("udp server bound on {local}"));

        let sink = self.sink.lock().clone();
        tokio::spawn(Self::read_loop(
            socket,
            Arc::clone(&self.peers),
            sink,
            self.logger.clone(),
            rx,
        ));

        Ok(true)
    }

    async fn close(&self) {
        self.closed_watch_tx.lock().await.take();
        *self.socket.lock().await = None;
        self.peers.lock().await.clear();
        *self.local_addr.lock() = None;
        self.state.set(EndpointState::Disconnected);
    }

    async fn write(&self, data: &[u8]) {
        let socket = self.socket.lock().await.clone();
        let Some(socket) = socket else {
            self.logger
                .warn(&format!("not bound, dropped {} bytes", data.len()));
            return;
        };

        let targets: Vec<SocketAddr> = self.peers.lock().await.values().copied().collect();
        if targets.is_empty() {
            self.logger
                .debug(&format!("no known peers for {} bytes", data.len()));
            return;
        }

        for addr in targets {
            match socket.send_to(data, addr).await {
                Ok(n) if n < data.len() => {
                    self.logger
                        .warn(&format!("incomplete send to {addr}: {n}/{} bytes", data.len()));
                }
                Ok(_) => {}
                Err(err) => {
                    self.logger.error(&format!("send to {addr} failed: {err}"));
                }
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
        format!("UdpServer:{}", self.port)
    }
}
