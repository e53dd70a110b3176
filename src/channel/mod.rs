
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use portable_atomic::{AtomicBool, Ordering};
use tokio::time::sleep;

use crate::buffer::RingBuffer;
use crate::config::ChannelConfig;
use crate::endpoint::{
    create_endpoint, is_datagram, DataSink, Endpoint, DATAGRAM_BUF_SIZE, READ_BUF_SIZE,
};
use crate::error::Result;
use crate::logging::ChannelLogger;
use crate::pool::WorkerPool;

/// Ring capacity per direction.
pub const RING_CAPACITY: usize = 1024 * 1024;

const STOP_WAIT_ROUNDS: usize = 5;
const STOP_WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Boxed so a re-armed drain's future type doesn't recursively reference its
/// own opaque type.
type BoxedDrain = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A named bridge between two endpoints.
///
/// Bytes received on one endpoint land in that direction's ring buffer and a
/// drain task submitted to the shared worker pool pumps them into the other
/// endpoint. Per direction at most one drain task is ever in flight, and an
/// idle channel owns no tasks at all: a pool of modest size carries hundreds
/// of channels.
pub struct Channel {
    name: String,
    input: Arc<dyn Endpoint>,
    output: Arc<dyn Endpoint>,
    forward: [Arc<ForwardPath>; 2],
    running: AtomicBool,
    logger: ChannelLogger,
}

/// One direction of the forwarder.
struct ForwardPath {
    buffer: RingBuffer,
    dst: Arc<dyn Endpoint>,
    pool: Arc<WorkerPool>,
    /// Single-flight flag: set while a drain task is queued or running.
    active: AtomicBool,
    chunk_size: usize,
    direction: &'static str,
    logger: ChannelLogger,
}

impl ForwardPath {
    /// Ensures a drain task is in flight, submitting one only when the flag
    /// was clear.
    fn arm(path: &Arc<ForwardPath>) {
        if !path.active.swap(true, Ordering::AcqRel) {
            path.pool.submit(Arc::clone(path).drain());
        }
    }

    /// Boxed (rather than `async fn`) so the re-arm call below names a
    /// concrete, finite future type instead of recursing through its own
    /// opaque return type.
    fn drain(self: Arc<Self>) -> BoxedDrain {
        Box::pin(async move {
            let mut chunk = vec![0u8; self.chunk_size];

            loop {
                let n = self.buffer.pop(&mut chunk);
                if n == 0 {
                    break;
                }
                self.logger.binary(self.direction, &chunk[..n]);
                self.dst.write(&chunk[..n]).await;
            }

            self.active.store(false, Ordering::Release);

            // a producer may have pushed between the final pop and the clear;
            // re-arm unless that producer already did
            if !self.buffer.is_empty() && !self.active.swap(true, Ordering::AcqRel) {
                let path = Arc::clone(&self);
                self.pool.submit(path.drain());
            }
        })
    }
}

/// Inbound callback of one endpoint: pushes into the direction's ring and
/// keeps the drain task armed.
struct ForwardSink {
    path: Arc<ForwardPath>,
}

impl DataSink for ForwardSink {
    fn on_data(&self, data: &[u8]) {
        if !self.path.buffer.push(data) {
            if !self.path.buffer.is_shutdown() {
                self.path.logger.warn(&format!(
                    "{} buffer full, dropped {} bytes",
                    self.path.direction,
                    data.len()
                ));
            }
            return;
        }
        ForwardPath::arm(&self.path);
    }
}

impl Channel {
    /// Builds a stopped channel from its configuration.
    pub fn new(config: &ChannelConfig, pool: Arc<WorkerPool>) -> Arc<Self> {
        let logger = ChannelLogger::new(config.name.as_str());
        logger.info(&format!(
            "creating channel: input {}, output {}",
            config.input.kind(),
            config.output.kind()
        ));

        let input = create_endpoint(&config.input, logger.node("input"));
        let output = create_endpoint(&config.output, logger.node("output"));

        Self::with_endpoints(
            &config.name,
            input,
            output,
            is_datagram(&config.input),
            is_datagram(&config.output),
            pool,
        )
    }

    /// Wires arbitrary endpoint implementations into a channel. Drain chunks
    /// are sized to the source kind so a datagram crosses the ring in one
    /// piece.
    pub(crate) fn with_endpoints(
        name: &str,
        input: Arc<dyn Endpoint>,
        output: Arc<dyn Endpoint>,
        input_datagram: bool,
        output_datagram: bool,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        let logger = ChannelLogger::new(name);

        let chunk_size = |datagram: bool| {
            if datagram {
                DATAGRAM_BUF_SIZE
            } else {
                READ_BUF_SIZE
            }
        };

        let forward_in = Arc::new(ForwardPath {
            buffer: RingBuffer::new(RING_CAPACITY),
            dst: Arc::clone(&output),
            pool: Arc::clone(&pool),
            active: AtomicBool::new(false),
            chunk_size: chunk_size(input_datagram),
            direction: "input->output",
            logger: logger.clone(),
        });
        let forward_out = Arc::new(ForwardPath {
            buffer: RingBuffer::new(RING_CAPACITY),
            dst: Arc::clone(&input),
            pool,
            active: AtomicBool::new(false),
            chunk_size: chunk_size(output_datagram),
            direction: "output->input",
            logger: logger.clone(),
        });

        input.set_data_sink(Arc::new(ForwardSink {
            path: Arc::clone(&forward_in),
        }));
        output.set_data_sink(Arc::new(ForwardSink {
            path: Arc::clone(&forward_out),
        }));

        Arc::new(Channel {
            name: name.to_owned(),
            input,
            output,
            forward: [forward_in, forward_out],
            running: AtomicBool::new(false),
            logger,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Opens both endpoints. When either fails the channel is stopped again
    /// and stays stopped until its configuration changes.
    pub async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::Release);

        // both sides come up independently
        let input_result = self.input.open().await;
        let output_result = self.output.open().await;

        match input_result.and(output_result) {
            Ok(_) => {
                self.logger.info("channel started");
                Ok(())
            }
            Err(err) => {
                self.stop().await;
                Err(err)
            }
        }
    }

    /// Shuts both rings, closes both endpoints and waits briefly for the
    /// drain tasks to leave. Idempotent; a no-op on a stopped channel.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        self.forward[0].buffer.shutdown();
        self.forward[1].buffer.shutdown();

        self.input.close().await;
        self.output.close().await;

        // drain tasks observe the shutdown on their next pop; the bound is a
        // liveness safeguard only
        let mut rounds = 0;
        while self
            .forward
            .iter()
            .any(|path| path.active.load(Ordering::Acquire))
            && rounds < STOP_WAIT_ROUNDS
        {
            sleep(STOP_WAIT_INTERVAL).await;
            rounds += 1;
        }

        self.logger.info("channel stopped");
    }
}
