use std::{
    net::{SocketAddr, ToSocketAddrs as _},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    buffer::LineBuffer,
    client::{run_ticker, Client, Dispatch},
    defaults::{KindDefaults, MetricDefaults, MetricKind},
    forwarder::{self, api::ApiSender, datagram::DatagramSender, BatchSender, RetryPolicy},
    writer::LineWriter,
};

const DEFAULT_NAMESPACE: &str = "application";
const DEFAULT_FLUSH_SIZE: usize = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_API_BASE_PATH: &str = "/tel/v2.0/metrics";
const DEFAULT_RETRY: RetryPolicy =
    RetryPolicy { max_attempts: 3, base_backoff: Duration::from_millis(100) };

/// Errors that could occur while building a [`Client`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the datagram remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The api token was empty or not usable as a header value.
    #[error("invalid api token")]
    InvalidToken,

    /// The flush size was zero.
    #[error("flush size must be at least 1")]
    InvalidFlushSize,

    /// The flush interval was zero.
    #[error("flush interval must be non-zero")]
    InvalidFlushInterval,

    /// The namespace was empty.
    #[error("namespace must not be empty")]
    InvalidNamespace,

    /// The sample rate was outside `1..=100`.
    #[error("sample rate must be between 1 and 100")]
    InvalidSampleRate,

    /// A client-level default aggregation frequency was zero.
    #[error("default aggregation frequency must be a positive number of seconds")]
    InvalidAggFreq,

    /// Failed to spawn the background machinery for the client.
    #[error("failed to spawn background machinery for the client")]
    Backend,
}

enum Endpoint {
    Datagram(Vec<SocketAddr>),
    Api { host: String, port: u16, token: String },
}

/// Builder for a metrics [`Client`].
pub struct ClientBuilder {
    endpoint: Endpoint,
    secure: bool,
    api_base_path: String,
    namespace: String,
    app: Option<String>,
    compression: bool,
    flush_size: usize,
    flush_interval: Option<Duration>,
    timeout: Duration,
    retry: RetryPolicy,
    sample_rate: u8,
    dry_run: bool,
    defaults: KindDefaults,
}

impl ClientBuilder {
    /// Creates a builder with the default configuration: datagram transport
    /// to `127.0.0.1:2013`, flush size 10, no periodic flush.
    pub fn new() -> Self {
        ClientBuilder {
            endpoint: Endpoint::Datagram(vec![SocketAddr::from(([127, 0, 0, 1], 2013))]),
            secure: true,
            api_base_path: DEFAULT_API_BASE_PATH.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            app: None,
            compression: false,
            flush_size: DEFAULT_FLUSH_SIZE,
            flush_interval: None,
            timeout: DEFAULT_TIMEOUT,
            retry: DEFAULT_RETRY,
            sample_rate: 100,
            dry_run: false,
            defaults: KindDefaults::default(),
        }
    }

    /// Selects the datagram transport and sets its remote address, in
    /// `<host>:<port>` form.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed or resolved.
    pub fn with_datagram_endpoint<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let addrs: Vec<SocketAddr> = addr
            .as_ref()
            .to_socket_addrs()
            .map_err(|e| BuildError::InvalidRemoteAddress { reason: e.to_string() })?
            .collect();
        if addrs.is_empty() {
            return Err(BuildError::InvalidRemoteAddress {
                reason: "address resolved to nothing".to_string(),
            });
        }
        self.endpoint = Endpoint::Datagram(addrs);
        Ok(self)
    }

    /// Selects the api transport and sets its endpoint and credential token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty.
    pub fn with_api_endpoint(
        mut self,
        host: impl Into<String>,
        port: u16,
        token: impl Into<String>,
    ) -> Result<Self, BuildError> {
        let token = token.into();
        if token.is_empty() {
            return Err(BuildError::InvalidToken);
        }
        self.endpoint = Endpoint::Api { host: host.into(), port, token };
        Ok(self)
    }

    /// Sets whether the api transport uses HTTPS.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the base intake path for the api transport.
    ///
    /// Pre-aggregated submissions are routed below it, at
    /// `<base>/aggregation/<agg>/frequency/<freq>`.
    ///
    /// Defaults to `/tel/v2.0/metrics`.
    #[must_use]
    pub fn with_api_base_path(mut self, path: impl Into<String>) -> Self {
        self.api_base_path = path.into();
        self
    }

    /// Enables gzip compression of api payloads.
    ///
    /// Defaults to `false`. Has no effect on the datagram transport.
    #[must_use]
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the number of buffered lines that triggers an automatic flush.
    ///
    /// A flush size of 1 flushes after every single call.
    ///
    /// Defaults to 10.
    #[must_use]
    pub fn with_flush_size(mut self, flush_size: usize) -> Self {
        self.flush_size = flush_size;
        self
    }

    /// Enables a periodic flush of whatever is buffered, on top of the
    /// size-triggered one. A tick with an empty buffer sends nothing.
    ///
    /// Disabled by default.
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Sets the transport timeout: the datagram write timeout, or the api
    /// request timeout per attempt.
    ///
    /// Defaults to 2 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy for the api transport: how many attempts a
    /// batch gets, and the backoff before the second attempt (doubling for
    /// each one after).
    ///
    /// Defaults to 3 attempts starting at 100ms.
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.retry = RetryPolicy { max_attempts: max_attempts.max(1), base_backoff };
        self
    }

    /// Sets the first segment of every encoded metric path.
    ///
    /// Defaults to `application`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the application name, appended to every metric as an `app` tag
    /// unless the metric already carries one.
    #[must_use]
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// Sets the client-side sample rate, in percent. At 70, roughly 30% of
    /// calls are discarded before encoding.
    ///
    /// Defaults to 100 (keep everything).
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u8) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Logs flushed batches instead of sending them.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the client-level defaults for one metric kind. Each field that is
    /// set replaces the built-in default for that kind entirely.
    #[must_use]
    pub fn with_defaults(mut self, kind: MetricKind, defaults: MetricDefaults) -> Self {
        self.defaults.set(kind, defaults);
        self
    }

    /// Builds the client, spawning its forwarder thread (and, when a flush
    /// interval is configured, its tick thread).
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration, or if the background
    /// machinery cannot be spawned.
    pub fn build(self) -> Result<Client, BuildError> {
        if self.flush_size == 0 {
            return Err(BuildError::InvalidFlushSize);
        }
        if self.flush_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(BuildError::InvalidFlushInterval);
        }
        if self.namespace.is_empty() {
            return Err(BuildError::InvalidNamespace);
        }
        if self.sample_rate == 0 || self.sample_rate > 100 {
            return Err(BuildError::InvalidSampleRate);
        }
        if self.defaults.iter().any(|defaults| defaults.agg_freq() == Some(0)) {
            return Err(BuildError::InvalidAggFreq);
        }

        let sender: Box<dyn BatchSender + Send> = match self.endpoint {
            Endpoint::Datagram(addrs) => Box::new(DatagramSender::new(addrs, self.timeout)),
            Endpoint::Api { host, port, token } => Box::new(ApiSender::new(
                format!("{host}:{port}"),
                &token,
                self.secure,
                self.api_base_path,
                self.compression,
                self.timeout,
                self.retry,
            )?),
        };

        let (ops_tx, ops_rx) = crossbeam_channel::unbounded();
        let dry_run = self.dry_run;
        let forwarder = std::thread::Builder::new()
            .name("statline-forwarder".to_string())
            .spawn(move || forwarder::run(sender, &ops_rx, dry_run))
            .map_err(|_| BuildError::Backend)?;

        let dispatch = Arc::new(Dispatch::new(
            Mutex::new(LineBuffer::new(self.flush_size)),
            ops_tx,
        ));

        let (ticker_stop, ticker) = match self.flush_interval {
            Some(interval) => {
                let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
                let tick_dispatch = Arc::clone(&dispatch);
                let handle = std::thread::Builder::new()
                    .name("statline-flush".to_string())
                    .spawn(move || run_ticker(&tick_dispatch, interval, &stop_rx))
                    .map_err(|_| BuildError::Backend)?;
                (Some(stop_tx), Some(handle))
            }
            None => (None, None),
        };

        Ok(Client::from_parts(
            LineWriter::new(self.namespace),
            self.app,
            self.sample_rate,
            self.defaults,
            dispatch,
            ticker_stop,
            ticker,
            forwarder,
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
