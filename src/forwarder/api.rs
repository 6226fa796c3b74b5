use std::{io::Write as _, time::Duration};

use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use http_body_util::Full;
use hyper::{
    header::{HeaderValue, CONTENT_ENCODING, CONTENT_TYPE},
    Method, Request, StatusCode, Uri,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use indexmap::IndexMap;
use tracing::{debug, error, warn};

use crate::{buffer::BufferedLine, builder::BuildError, defaults::Aggregation};

use super::{join_lines, BatchSender, RetryPolicy};

const TOKEN_HEADER: &str = "m-api-token";

type IntakeClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Authenticated, batched HTTP sender.
///
/// Each delivered batch becomes one `PUT` per intake bucket: raw lines go to
/// the base path, pre-aggregated lines to
/// `<base>/aggregation/<agg>/frequency/<freq>`. Payloads are newline-joined
/// and optionally gzip-compressed. Transient failures (connection errors,
/// timeouts, 5xx) are retried with doubling backoff; 4xx responses are
/// dropped immediately. A failed bucket never blocks the remaining ones.
pub(crate) struct ApiSender {
    runtime: tokio::runtime::Runtime,
    client: IntakeClient,
    scheme: &'static str,
    authority: String,
    base_path: String,
    token: HeaderValue,
    compression: bool,
    timeout: Duration,
    retry: RetryPolicy,
}

enum SendOutcome {
    Delivered(StatusCode),
    Dropped,
    Transient(String),
}

impl ApiSender {
    pub fn new(
        authority: String,
        token: &str,
        secure: bool,
        base_path: String,
        compression: bool,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, BuildError> {
        // The runtime exists only to drive the hyper client; all sends are
        // blocked on from the forwarder thread.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|_| BuildError::Backend)?;

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);

        let mut token = HeaderValue::from_str(token).map_err(|_| BuildError::InvalidToken)?;
        token.set_sensitive(true);

        Ok(ApiSender {
            runtime,
            client,
            scheme: if secure { "https" } else { "http" },
            authority,
            base_path,
            token,
            compression,
            timeout,
            retry,
        })
    }

    fn bucket_uri(&self, bucket: Option<(Aggregation, u32)>) -> Option<Uri> {
        let path = match bucket {
            Some((agg, freq)) => {
                format!("{}/aggregation/{}/frequency/{}", self.base_path, agg.as_str(), freq)
            }
            None => self.base_path.clone(),
        };
        let uri = format!("{}://{}{}", self.scheme, self.authority, path);
        match uri.parse::<Uri>() {
            Ok(uri) => Some(uri),
            Err(e) => {
                error!(error = %e, "failed to build intake uri, dropping batch");
                None
            }
        }
    }

    fn encode_body(&self, payload: &str) -> Option<Bytes> {
        if !self.compression {
            return Some(Bytes::copy_from_slice(payload.as_bytes()));
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        if let Err(e) = encoder.write_all(payload.as_bytes()) {
            error!(error = %e, "failed to compress payload, dropping batch");
            return None;
        }
        match encoder.finish() {
            Ok(compressed) => Some(Bytes::from(compressed)),
            Err(e) => {
                error!(error = %e, "failed to compress payload, dropping batch");
                None
            }
        }
    }

    fn send_bucket(&mut self, bucket: Option<(Aggregation, u32)>, lines: &[&str]) {
        let Some(uri) = self.bucket_uri(bucket) else {
            return;
        };
        let payload = join_lines(lines.iter().copied());
        let Some(body) = self.encode_body(&payload) else {
            return;
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&uri, body.clone()) {
                SendOutcome::Delivered(status) => {
                    debug!(%status, lines = lines.len(), "batch accepted");
                    return;
                }
                SendOutcome::Dropped => return,
                SendOutcome::Transient(reason) => {
                    if attempt >= self.retry.max_attempts {
                        error!(
                            %reason,
                            attempts = attempt,
                            lines = lines.len(),
                            "retries exhausted, dropping batch"
                        );
                        return;
                    }
                    let backoff = self.retry.backoff(attempt);
                    warn!(%reason, attempt, ?backoff, "transient send failure, backing off");
                    std::thread::sleep(backoff);
                }
            }
        }
    }

    fn send_once(&mut self, uri: &Uri, body: Bytes) -> SendOutcome {
        let mut builder = Request::builder()
            .method(Method::PUT)
            .uri(uri.clone())
            .header(TOKEN_HEADER, self.token.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        if self.compression {
            builder = builder.header(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        let request = match builder.body(Full::new(body)) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "failed to build intake request, dropping batch");
                return SendOutcome::Dropped;
            }
        };

        let timeout = self.timeout;
        let pending = self.client.request(request);
        let response =
            self.runtime.block_on(async { tokio::time::timeout(timeout, pending).await });

        match response {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    SendOutcome::Delivered(status)
                } else if status.is_server_error() {
                    SendOutcome::Transient(format!("collector returned {status}"))
                } else {
                    // 4xx and other unexpected statuses: retrying will not help.
                    error!(%status, "collector rejected batch, dropping");
                    SendOutcome::Dropped
                }
            }
            Ok(Err(e)) => SendOutcome::Transient(e.to_string()),
            Err(_) => SendOutcome::Transient(format!("request timed out after {:?}", self.timeout)),
        }
    }
}

impl BatchSender for ApiSender {
    fn deliver(&mut self, batch: &[BufferedLine]) {
        // One request per intake bucket, in first-seen order.
        let mut buckets: IndexMap<Option<(Aggregation, u32)>, Vec<&str>> = IndexMap::new();
        for entry in batch {
            buckets.entry(entry.bucket).or_default().push(entry.line.as_str());
        }
        for (bucket, lines) in buckets {
            self.send_bucket(bucket, &lines);
        }
    }
}
