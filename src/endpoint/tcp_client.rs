#[cfg(test)]
#[path = "tcp_client_test.rs"]
mod tcp_client_test;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::sleep;

use super::{
    DataSink, Endpoint, EndpointState, StateHandle, DEFAULT_RECONNECT_INTERVAL, READ_BUF_SIZE,
};
use crate::error::Result;
use crate::logging::ChannelLogger;

type StreamSlot = Arc<AsyncMutex<Option<Arc<TcpStream>>>>;

enum LoopExit {
    /// The endpoint was closed; stop for good.
    Closed,
    /// The connection was lost; re-enter the reconnect path.
    Lost,
}

/// Outbound TCP endpoint that keeps reconnecting to its peer.
///
/// A lost connection moves the endpoint back to `Connecting` and a new
/// attempt starts after the cool-down interval. Bytes written while not
/// connected are dropped and logged.
pub struct TcpClientEndpoint {
    ip: String,
    port: u16,
    reconnect_interval: Duration,
    state: StateHandle,
    sink: Mutex<Option<Arc<dyn DataSink>>>,
    logger: ChannelLogger,
    stream: StreamSlot,
    closed_watch_tx: AsyncMutex<Option<watch::Sender<()>>>,
}

impl TcpClientEndpoint {
    pub fn new(ip: String, port: u16, logger: ChannelLogger) -> Self {
        Self::with_reconnect_interval(ip, port, DEFAULT_RECONNECT_INTERVAL, logger)
    }

    pub fn with_reconnect_interval(
        ip: String,
        port: u16,
        reconnect_interval: Duration,
        logger: ChannelLogger,
    ) -> Self {
        TcpClientEndpoint {
            ip,
            port,
            reconnect_interval,
            state: StateHandle::new(),
            sink: Mutex::new(None),
            logger,
            stream: Arc::new(AsyncMutex::new(None)),
            closed_watch_tx: AsyncMutex::new(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        addr: String,
        reconnect_interval: Duration,
        state: StateHandle,
        sink: Option<Arc<dyn DataSink>>,
        logger: ChannelLogger,
        stream_slot: StreamSlot,
        mut closed_rx: watch::Receiver<()>,
    ) {
        loop {
            state.set(EndpointState::Connecting);

            tokio::select! {
                result = TcpStream::connect(addr.as_str()) => {
                    match result {
                        Ok(stream) => {
                            let stream = Arc::new(stream);
                            *stream_slot.lock().await = Some(Arc::clone(&stream));
                            state.set(EndpointState::Connected);
                            logger.info(&format!("connected to {addr}"));

                            let exit = Self::read_loop(
                                stream,
                                &state,
                                &sink,
                                &logger,
                                &mut closed_rx,
                            )
                            .await;

                            *stream_slot.lock().await = None;
                            if matches!(exit, LoopExit::Closed) {
                                break;
                            }
                            state.set(EndpointState::Disconnected);
                        }
                        Err(err) => {
                            logger.info(&format!("connect to {addr} failed: {err}"));
                            state.set(EndpointState::Disconnected);
                        }
                    }
                }
                _ = closed_rx.changed() => break,
            }

            // cool-down before the next attempt
            tokio::select! {
                _ = sleep(reconnect_interval) => {}
                _ = closed_rx.changed() => break,
            }
        }

        state.set(EndpointState::Disconnected);
    }

    async fn read_loop(
        stream: Arc<TcpStream>,
        state: &StateHandle,
        sink: &Option<Arc<dyn DataSink>>,
        logger: &ChannelLogger,
        closed_rx: &mut watch::Receiver<()>,
    ) -> LoopExit {
        let mut buf = vec![0u8; READ_BUF_SIZE];

        loop {
            tokio::select! {
                ready = stream.readable() => {
                    if ready.is_err() {
                        return LoopExit::Lost;
                    }
                    match stream.try_read(&mut buf) {
                        Ok(0) => {
                            logger.info("server disconnected");
                            return LoopExit::Lost;
                        }
                        Ok(n) => {
                            if let Some(sink) = sink {
                                sink.on_data(&buf[..n]);
                            }
                        }
                        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                        Err(err) => {
                            logger.error(&format!("receive error: {err}"));
                            state.set(EndpointState::Error);
                            return LoopExit::Lost;
                        }
                    }
                }
                _ = closed_rx.changed() => return LoopExit::Closed,
            }
        }
    }
}

#[async_trait]
impl Endpoint for TcpClientEndpoint {
    async fn open(&self) -> Result<bool> {
        let mut closed_tx = self.closed_watch_tx.lock().await;
        if closed_tx.is_some() {
            return Ok(self.state.get() == EndpointState::Connected);
        }

        let (tx, rx) = watch::channel(());
        *closed_tx = Some(tx);

        tokio::spawn(Self::run_loop(
            format!("{}:{}", self.ip, self.port),
            self.reconnect_interval,
            self.state.clone(),
            self.sink.lock().clone(),
            self.logger.clone(),
            Arc::clone(&self.stream),
            rx,
        ));

        Ok(true)
    }

    async fn close(&self) {
        self.closed_watch_tx.lock().await.take();
        *self.stream.lock().await = None;
        self.state.set(EndpointState::Disconnected);
    }

    async fn write(&self, data: &[u8]) {
        if self.state.get() != EndpointState::Connected {
            self.logger
                .warn(&format!("not connected, dropped {} bytes", data.len()));
            return;
        }

        let stream = self.stream.lock().await.clone();
        let Some(stream) = stream else {
            self.logger
                .warn(&format!("not connected, dropped {} bytes", data.len()));
            return;
        };

        match stream.try_write(data) {
            Ok(n) if n < data.len() => {
                self.logger
                    .warn(&format!("short write: {n}/{} bytes", data.len()));
            }
            Ok(_) => {}
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.logger
                    .warn(&format!("peer not ready, dropped {} bytes", data.len()));
            }
            Err(err) => {
                // the read loop sees the dead socket and runs the reconnect path
                self.logger.error(&format!("send failed: {err}"));
                self.state.set(EndpointState::Error);
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
        format!("TcpClient:{}:{}", self.ip, self.port)
    }
}
