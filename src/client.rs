use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, SystemTime},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng as _;
use tracing::error;

use crate::{
    buffer::{BufferedLine, LineBuffer},
    defaults::{resolve, Aggregation, KindDefaults, MetricKind, MetricOpts},
    forwarder::ForwarderOp,
    writer::{LineWriter, MetricError, MetricValue},
};

/// The shared flush path: the line buffer plus the channel feeding the
/// forwarder thread. Mutated by the calling thread and, when a flush
/// interval is configured, the tick thread; the forwarder is the sole
/// consumer.
pub(crate) struct Dispatch {
    buffer: Mutex<LineBuffer>,
    ops: Sender<ForwarderOp>,
}

impl Dispatch {
    pub fn new(buffer: Mutex<LineBuffer>, ops: Sender<ForwarderOp>) -> Self {
        Dispatch { buffer, ops }
    }

    fn append(&self, line: BufferedLine) {
        let batch = self.buffer.lock().append(line);
        if let Some(batch) = batch {
            self.send(batch);
        }
    }

    fn flush(&self) {
        let batch = self.buffer.lock().detach();
        if !batch.is_empty() {
            self.send(batch);
        }
    }

    fn send(&self, batch: Vec<BufferedLine>) {
        if self.ops.send(ForwarderOp::Deliver(batch)).is_err() {
            error!("forwarder is gone, dropping batch");
        }
    }

    fn shutdown(&self) {
        let _ = self.ops.send(ForwarderOp::Shutdown);
    }
}

/// Periodic flush loop. Exits when the stop channel is signalled or
/// disconnected.
pub(crate) fn run_ticker(dispatch: &Dispatch, interval: Duration, stop: &Receiver<()>) {
    let ticks = crossbeam_channel::tick(interval);
    loop {
        crossbeam_channel::select! {
            recv(ticks) -> _ => dispatch.flush(),
            recv(stop) -> _ => break,
        }
    }
}

/// A buffered metrics client.
///
/// Every call resolves the layered tag/aggregation configuration, encodes one
/// line, and appends it to the buffer; when the buffer reaches the configured
/// flush size the pending batch is handed to a background forwarder thread
/// for delivery. Calls never block on network I/O, and transport failures are
/// never surfaced to them.
///
/// Dropping the client flushes whatever is buffered and drains the forwarder
/// before returning.
pub struct Client {
    writer: LineWriter,
    app: Option<String>,
    sample_rate: u8,
    defaults: KindDefaults,
    dispatch: Arc<Dispatch>,
    ticker_stop: Option<Sender<()>>,
    ticker: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Client {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        writer: LineWriter,
        app: Option<String>,
        sample_rate: u8,
        defaults: KindDefaults,
        dispatch: Arc<Dispatch>,
        ticker_stop: Option<Sender<()>>,
        ticker: Option<JoinHandle<()>>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Client {
            writer,
            app,
            sample_rate,
            defaults,
            dispatch,
            ticker_stop,
            ticker,
            forwarder: Some(forwarder),
        }
    }

    /// Submits a timer observation, in milliseconds unless retagged.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the value is not finite; the
    /// event is not buffered.
    pub fn timer(
        &self,
        name: &str,
        value: impl Into<MetricValue>,
        opts: MetricOpts,
    ) -> Result<(), MetricError> {
        self.put(MetricKind::Timer, name, value.into(), &opts, None)
    }

    /// Submits a counter increment.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the value is not finite; the
    /// event is not buffered.
    pub fn counter(
        &self,
        name: &str,
        value: impl Into<MetricValue>,
        opts: MetricOpts,
    ) -> Result<(), MetricError> {
        self.put(MetricKind::Counter, name, value.into(), &opts, None)
    }

    /// Submits a gauge reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the value is not finite; the
    /// event is not buffered.
    pub fn gauge(
        &self,
        name: &str,
        value: impl Into<MetricValue>,
        opts: MetricOpts,
    ) -> Result<(), MetricError> {
        self.put(MetricKind::Gauge, name, value.into(), &opts, None)
    }

    /// Submits a timer value the caller already aggregated with `agg` over a
    /// window of `agg_freq` seconds.
    ///
    /// The encoded line carries no aggregation descriptor; the aggregation
    /// and window only route the value to the matching intake bucket on the
    /// api transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, the value is not finite, or
    /// `agg_freq` is zero; the event is not buffered.
    pub fn aggregated_timer(
        &self,
        name: &str,
        value: impl Into<MetricValue>,
        agg: Aggregation,
        agg_freq: u32,
        opts: MetricOpts,
    ) -> Result<(), MetricError> {
        self.put(MetricKind::Timer, name, value.into(), &opts, Some((agg, agg_freq)))
    }

    /// Submits a pre-aggregated counter value. See [`Client::aggregated_timer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, the value is not finite, or
    /// `agg_freq` is zero; the event is not buffered.
    pub fn aggregated_counter(
        &self,
        name: &str,
        value: impl Into<MetricValue>,
        agg: Aggregation,
        agg_freq: u32,
        opts: MetricOpts,
    ) -> Result<(), MetricError> {
        self.put(MetricKind::Counter, name, value.into(), &opts, Some((agg, agg_freq)))
    }

    /// Submits a pre-aggregated gauge value. See [`Client::aggregated_timer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, the value is not finite, or
    /// `agg_freq` is zero; the event is not buffered.
    pub fn aggregated_gauge(
        &self,
        name: &str,
        value: impl Into<MetricValue>,
        agg: Aggregation,
        agg_freq: u32,
        opts: MetricOpts,
    ) -> Result<(), MetricError> {
        self.put(MetricKind::Gauge, name, value.into(), &opts, Some((agg, agg_freq)))
    }

    /// Flushes buffered lines immediately, regardless of the flush size.
    pub fn flush(&self) {
        self.dispatch.flush();
    }

    fn put(
        &self,
        kind: MetricKind,
        name: &str,
        value: MetricValue,
        opts: &MetricOpts,
        bucket: Option<(Aggregation, u32)>,
    ) -> Result<(), MetricError> {
        if let Some((_, agg_freq)) = bucket {
            if agg_freq == 0 {
                return Err(MetricError::ZeroAggFreq);
            }
        }

        let resolved = resolve(kind, self.defaults.get(kind), opts, self.app.as_deref());
        let timestamp = epoch_seconds();
        let descriptor = match bucket {
            // Pre-aggregated: no descriptor on the line, the bucket routes it.
            Some(_) => None,
            None => Some((resolved.agg.as_slice(), resolved.agg_freq)),
        };
        let line = self.writer.write_line(kind, name, value, &resolved.tags, descriptor, timestamp)?;

        // Sampling discards after validation so a malformed call always errors.
        if self.sampled() {
            self.dispatch.append(BufferedLine { line, bucket });
        }
        Ok(())
    }

    fn sampled(&self) -> bool {
        self.sample_rate >= 100 || rand::rng().random_range(0u8..100) < self.sample_rate
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Stop the periodic flush first so it cannot race the final drain.
        drop(self.ticker_stop.take());
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }

        self.dispatch.flush();
        self.dispatch.shutdown();
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.join();
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
