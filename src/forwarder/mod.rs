use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::buffer::BufferedLine;

pub(crate) mod api;
pub(crate) mod datagram;

/// Retry behavior for the api transport.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff before the next attempt, doubling per completed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Operations accepted by the forwarder thread.
pub(crate) enum ForwarderOp {
    /// Deliver a flushed batch.
    Deliver(Vec<BufferedLine>),
    /// Exit after the previously queued batches have drained.
    Shutdown,
}

/// Delivers flushed batches over a transport.
///
/// Delivery is terminal: a sender either gets the batch onto the wire or
/// drops it after applying its own failure policy. Nothing propagates back
/// to the code that produced the metrics.
pub(crate) trait BatchSender {
    fn deliver(&mut self, batch: &[BufferedLine]);
}

/// Drains forwarder ops until shutdown or channel disconnection.
pub(crate) fn run(mut sender: Box<dyn BatchSender + Send>, ops: &Receiver<ForwarderOp>, dry_run: bool) {
    while let Ok(op) = ops.recv() {
        match op {
            ForwarderOp::Deliver(batch) => {
                if batch.is_empty() {
                    continue;
                }
                if dry_run {
                    for entry in &batch {
                        debug!(line = %entry.line, "dry run, discarding line");
                    }
                    continue;
                }
                sender.deliver(&batch);
            }
            ForwarderOp::Shutdown => break,
        }
    }
}

/// Newline-joins encoded lines into one payload, no trailing newline.
pub(crate) fn join_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    let mut payload = String::new();
    for (idx, line) in lines.into_iter().enumerate() {
        if idx > 0 {
            payload.push('\n');
        }
        payload.push_str(line);
    }
    payload
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{join_lines, RetryPolicy};

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = RetryPolicy { max_attempts: 3, base_backoff: Duration::from_millis(100) };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn joined_lines_have_no_trailing_newline() {
        assert_eq!(join_lines(["a", "b"]), "a\nb");
        assert_eq!(join_lines(["a"]), "a");
        assert_eq!(join_lines(Vec::<&str>::new()), "");
    }
}
