#[cfg(test)]
#[path = "serial_test.rs"]
mod serial_test;

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::{DataSink, Endpoint, EndpointState, StateHandle, READ_BUF_SIZE};
use crate::error::{Error, Result};
use crate::logging::ChannelLogger;

/// Baud rates accepted by `open()`; the classic termios table.
pub const STANDARD_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial port endpoint: raw 8N1, no flow control, 100 ms read polling.
///
/// Reads run on a blocking task so the bounded poll timeout keeps the reader
/// responsive to `close()`. An unsupported baud rate is a permanent error:
/// `open()` fails and the endpoint stays closed.
pub struct SerialEndpoint {
    path: String,
    baud_rate: u32,
    state: StateHandle,
    sink: Mutex<Option<Arc<dyn DataSink>>>,
    logger: ChannelLogger,
    writer: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    shutdown: Arc<AtomicBool>,
    reader: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SerialEndpoint {
    pub fn new(path: String, baud_rate: u32, logger: ChannelLogger) -> Self {
        SerialEndpoint {
            path,
            baud_rate,
            state: StateHandle::new(),
            sink: Mutex::new(None),
            logger,
            writer: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: AsyncMutex::new(None),
        }
    }

    fn read_loop(
        mut port: Box<dyn SerialPort>,
        sink: Option<Arc<dyn DataSink>>,
        logger: ChannelLogger,
        shutdown: Arc<AtomicBool>,
        state: StateHandle,
    ) {
        let mut buf = [0u8; READ_BUF_SIZE];

        while !shutdown.load(Ordering::Acquire) {
            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    if let Some(sink) = &sink {
                        sink.on_data(&buf[..n]);
                    }
                }
                // the poll timeout surfaces as TimedOut (or WouldBlock on
                // some platforms); both just mean "no bytes yet"
                Err(ref err)
                    if err.kind() == io::ErrorKind::TimedOut
                        || err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::Interrupted =>
                {
                    continue
                }
                Err(err) => {
                    logger.error(&format!("read error: {err}"));
                    state.set(EndpointState::Error);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Endpoint for SerialEndpoint {
    async fn open(&self) -> Result<bool> {
        let mut reader = self.reader.lock().await;
        if reader.is_some() {
            return Ok(self.state.get() == EndpointState::Connected);
        }

        if !STANDARD_BAUD_RATES.contains(&self.baud_rate) {
            self.state.set(EndpointState::Error);
            self.logger
                .error(&format!("unsupported baud rate {}", self.baud_rate));
            return Err(Error::ErrUnsupportedBaudRate(self.baud_rate));
        }

        self.state.set(EndpointState::Connecting);
        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_TIMEOUT)
            .open();

        let port = match port {
            Ok(port) => port,
            Err(err) => {
                self.state.set(EndpointState::Error);
                self.logger
                    .error(&format!("open {} failed: {err}", self.path));
                return Err(err.into());
            }
        };

        let read_half = match port.try_clone() {
            Ok(half) => half,
            Err(err) => {
                self.state.set(EndpointState::Error);
                self.logger
                    .error(&format!("clone of {} failed: {err}", self.path));
                return Err(err.into());
            }
        };

        *self.writer.lock() = Some(port);
        self.shutdown.store(false, Ordering::Release);
        self.state.set(EndpointState::Connected);
        self.logger
            .info(&format!("opened {} at {} baud", self.path, self.baud_rate));

        let sink = self.sink.lock().clone();
        let logger = self.logger.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let state = self.state.clone();
        *reader = Some(tokio::task::spawn_blocking(move || {
            Self::read_loop(read_half, sink, logger, shutdown, state);
        }));

        Ok(true)
    }

    async fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.writer.lock().take();

        // the reader observes shutdown within one poll timeout
        if let Some(handle) = self.reader.lock().await.take() {
            let _ = handle.await;
        }
        self.state.set(EndpointState::Disconnected);
    }

    async fn write(&self, data: &[u8]) {
        let writer = Arc::clone(&self.writer);
        let logger = self.logger.clone();
        let state = self.state.clone();
        let data = data.to_vec();

        // a tty write can stall at low baud rates; keep it off the shared
        // runtime like the read path
        let _ = tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock();
            match writer.as_mut() {
                None => {
                    logger.warn(&format!("port not open, dropped {} bytes", data.len()));
                }
                Some(port) => match port.write(&data) {
                    Ok(n) if n < data.len() => {
                        logger.warn(&format!("incomplete write: {n}/{} bytes", data.len()));
                        state.set(EndpointState::Error);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        logger.error(&format!("write failed: {err}"));
                        state.set(EndpointState::Error);
                    }
                },
            }
        })
        .await;
    }

    fn set_data_sink(&self, sink: Arc<dyn DataSink>) {
        *self.sink.lock() = Some(sink);
    }

    fn state(&self) -> EndpointState {
        self.state.get()
    }

    fn info(&self) -> String {
        format!("Serial:{}:{}", self.path, self.baud_rate)
    }
}
