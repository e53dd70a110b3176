#[cfg(test)]
#[path = "tcp_server_test.rs"]
mod tcp_server_test;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex as AsyncMutex};

use super::{DataSink, Endpoint, EndpointState, StateHandle, READ_BUF_SIZE};
use crate::error::Result;
use crate::logging::ChannelLogger;

type PeerMap = Arc<AsyncMutex<HashMap<SocketAddr, Arc<TcpStream>>>>;

/// TCP listener endpoint accepting any number of concurrent clients.
///
/// Inbound bytes from every client feed the same sink; outbound writes are
/// broadcast to every connected client. The endpoint reports `Connected` as
/// long as the listener is bound, whether or not any peer is attached.
pub struct TcpServerEndpoint {
    port: u16,
    state: StateHandle,
    sink: Mutex<Option<Arc<dyn DataSink>>>,
    logger: ChannelLogger,
    peers: PeerMap,
    closed_watch_tx: AsyncMutex<Option<watch::Sender<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpServerEndpoint {
    pub fn new(port: u16, logger: ChannelLogger) -> Self {
        TcpServerEndpoint {
            port,
            state: StateHandle::new(),
            sink: Mutex::new(None),
            logger,
            peers: Arc::new(AsyncMutex::new(HashMap::new())),
            closed_watch_tx: AsyncMutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Actual bound address, available while open. With a configured port of
    /// 0 the OS picks one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    fn bind_listener(port: u16) -> io::Result<TcpListener> {
        let addr: SocketAddr = format!("0.0.0.0:{port}")
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{e}")))?;

        // SO_REUSEADDR before bind so a restarting bridge can reclaim the
        // port without waiting out TIME_WAIT
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;

        TcpListener::from_std(socket.into())
    }

    async fn accept_loop(
        listener: TcpListener,
        peers: PeerMap,
        sink: Option<Arc<dyn DataSink>>,
        logger: ChannelLogger,
        mut closed_rx: watch::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            logger.info(&format!("new client connected: {addr}"));
                            let stream = Arc::new(stream);
                            peers.lock().await.insert(addr, Arc::clone(&stream));

                            tokio::spawn(Self::peer_loop(
                                stream,
                                addr,
                                Arc::clone(&peers),
                                sink.clone(),
                                logger.clone(),
                                closed_rx.clone(),
                            ));
                        }
                        Err(err) => {
                            logger.error(&format!("accept failed: {err}"));
                        }
                    }
                }
                _ = closed_rx.changed() => break,
            }
        }
    }

    async fn peer_loop(
        stream: Arc<TcpStream>,
        addr: SocketAddr,
        peers: PeerMap,
        sink: Option<Arc<dyn DataSink>>,
        logger: ChannelLogger,
        mut closed_rx: watch::Receiver<()>,
    ) {
        let mut buf = vec![0u8; READ_BUF_SIZE];

        loop {
            tokio::select! {
                ready = stream.readable() => {
                    if ready.is_err() {
                        break;
                    }
                    match stream.try_read(&mut buf) {
                        Ok(0) => {
                            logger.info(&format!("client {addr} disconnected"));
                            break;
                        }
                        Ok(n) => {
                            if let Some(sink) = &sink {
                                sink.on_data(&buf[..n]);
                            }
                        }
                        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                        Err(err) => {
                            logger.error(&format!("receive error from {addr}: {err}"));
                            break;
                        }
                    }
                }
                _ = closed_rx.changed() => break,
            }
        }

        peers.lock().await.remove(&addr);
    }
}

#[async_trait]
impl Endpoint for TcpServerEndpoint {
    async fn open(&self) -> Result<bool> {
        let mut closed_tx = self.closed_watch_tx.lock().await;
        if closed_tx.is_some() {
            return Ok(self.state.get() == EndpointState::Connected);
        }

        self.state.set(EndpointState::Connecting);
        let listener = match Self::bind_listener(self.port) {
            Ok(listener) => listener,
            Err(err) => {
                self.state.set(EndpointState::Error);
                self.logger
                    .error(&format!("bind to port {} failed: {err}", self.port));
                return Err(err.into());
            }
        };

        let local = listener.local_addr()?;
        *self.local_addr.lock() = Some(local);

        let (tx, rx) = watch::channel(());
        *closed_tx = Some(tx);
        self.state.set(EndpointState::Connected);
        self.logger.info(&format!("listening on {local}"));

        let sink = self.sink.lock().clone();
        tokio::spawn(Self::accept_loop(
            listener,
            Arc::clone(&self.peers),
            sink,
            self.logger.clone(),
            rx,
        ));

        Ok(true)
    }

    async fn close(&self) {
        // dropping the watch sender wakes the accept loop and every peer loop
        self.closed_watch_tx.lock().await.take();
        self.peers.lock().await.clear();
        *self.local_addr.lock() = None;
        self.state.set(EndpointState::Disconnected);
    }

    async fn write(&self, data: &[u8]) {
        if self.state.get() != EndpointState::Connected {
            self.logger
                .warn(&format!("not listening, dropped {} bytes", data.len()));
            return;
        }

        let mut failed = Vec::new();
        {
            let peers = self.peers.lock().await;
            if peers.is_empty() {
                // broadcast to zero peers succeeds with zero effect
                self.logger
                    .debug(&format!("no connected clients for {} bytes", data.len()));
                return;
            }

            for (addr, stream) in peers.iter() {
                match stream.try_write(data) {
                    Ok(n) if n < data.len() => {
                        self.logger
                            .warn(&format!("short write to {addr}: {n}/{} bytes", data.len()));
                    }
                    Ok(_) => {}
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                        self.logger
                            .warn(&format!("client {addr} not ready, dropped {} bytes", data.len()));
                    }
                    Err(err) => {
                        self.logger.error(&format!("send error to {addr}: {err}"));
                        failed.push(*addr);
                    }
                }
            }
        }

        if !failed.is_empty() {
            // deferred removal: the peer's read loop notices the dead socket
            // and finishes its own cleanup
            let mut peers = self.peers.lock().await;
            for addr in failed {
                peers.remove(&addr);
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
        format!("TcpServer:{}", self.port)
    }
}
