//! Pod log follower
//!
//! Opens a `follow=true` log request for one pod and copies its lines into
//! a caller-supplied sink. Any failure (no connection, pod not found, error
//! status, interrupted stream, or the stream simply ending because the pod
//! restarted) is logged, followed by a fixed wait, and the request is opened
//! again. There is no retry limit; the task runs until cancelled or until
//! the sink fails.
//!
//! Lines are requested with `timestamps=true`. The server's timestamp is
//! stripped before writing and remembered, and reconnects ask for
//! `sinceTime` at that timestamp (floored to the second). Lines the server
//! replays from before the last delivered one are dropped, so a reconnect
//! may repeat output but never skips any. Only server clocks are involved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{ApiPaths, ClusterApi, Outcome};

/// Wait between reconnect attempts
pub const LOG_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for the log follower
#[derive(Debug, Clone)]
pub struct LogStreamConfig {
    /// Fixed wait before every reconnect (default: 10s)
    pub retry_interval: Duration,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            retry_interval: LOG_RETRY_INTERVAL,
        }
    }
}

impl LogStreamConfig {
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Counters for one follow task
#[derive(Debug, Default)]
pub struct LogStreamStats {
    attempts: AtomicU64,
    connections: AtomicU64,
    bytes: AtomicU64,
}

impl LogStreamStats {
    /// Log requests issued, including the first
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Log requests issued after the first
    pub fn reconnects(&self) -> u64 {
        self.attempts().saturating_sub(1)
    }

    /// Requests that opened a stream
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Bytes copied into the sink
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

/// Follows pod logs through a cluster client
pub struct LogStreamer<C> {
    client: Arc<C>,
    config: LogStreamConfig,
}

impl<C> Clone for LogStreamer<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
        }
    }
}

/// Handle to a running follow task
pub struct LogStream<W> {
    cancel: CancellationToken,
    stats: Arc<LogStreamStats>,
    task: JoinHandle<W>,
}

impl<W> LogStream<W> {
    /// Ask the task to stop; it wakes from any wait or read immediately
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn stats(&self) -> &LogStreamStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the task has stopped on its own or been cancelled
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    /// Stop the task and take the sink back
    pub async fn shutdown(self) -> Result<W, tokio::task::JoinError> {
        self.cancel.cancel();
        self.task.await
    }
}

impl<C: ClusterApi + 'static> LogStreamer<C> {
    pub fn new(client: Arc<C>, config: LogStreamConfig) -> Self {
        Self { client, config }
    }

    /// Spawn a task following `pod` in `namespace` into `sink`.
    ///
    /// The task owns the sink until it is shut down.
    pub fn follow<W>(&self, pod: &str, namespace: &str, mut sink: W) -> LogStream<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let stats = Arc::new(LogStreamStats::default());

        let streamer = self.clone();
        let pod = pod.to_string();
        let namespace = namespace.to_string();
        let task_cancel = cancel.clone();
        let task_stats = Arc::clone(&stats);

        let task = tokio::spawn(async move {
            if let Err(e) = streamer
                .run(&pod, &namespace, &mut sink, &task_cancel, &task_stats)
                .await
            {
                error!("Log sink for {}/{} failed, stopping: {}", namespace, pod, e);
            }
            task_cancel.cancel();
            sink
        });

        LogStream {
            cancel,
            stats,
            task,
        }
    }

    /// Follow loop. Returns `Ok` once cancelled, or the sink's write error.
    pub async fn run<W>(
        &self,
        pod: &str,
        namespace: &str,
        sink: &mut W,
        cancel: &CancellationToken,
        stats: &LogStreamStats,
    ) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let path = ApiPaths::pod_log(namespace, pod);
        let mut cursor = LineCursor::default();

        info!("Following logs of {}/{}", namespace, pod);

        while !cancel.is_cancelled() {
            let attempt = stats.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let query = log_query(cursor.since());

            let opened = tokio::select! {
                _ = cancel.cancelled() => break,
                opened = self.client.stream(&path, &query) => opened,
            };

            match opened {
                Err(e) => warn!("Log request for {}/{} failed: {}", namespace, pod, e),
                Ok(Outcome::NotFound) => {
                    warn!("Pod {}/{} not found, waiting for it", namespace, pod)
                }
                Ok(Outcome::Failure { status, body }) => warn!(
                    "Log request for {}/{} answered {}: {}",
                    namespace,
                    pod,
                    status,
                    String::from_utf8_lossy(&body).trim()
                ),
                Ok(Outcome::Success {
                    payload: mut chunks,
                    ..
                }) => {
                    stats.connections.fetch_add(1, Ordering::SeqCst);
                    debug!("Log stream for {}/{} open (attempt {})", namespace, pod, attempt);

                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            next = chunks.next() => next,
                        };

                        match next {
                            Some(Ok(chunk)) => {
                                deliver(sink, &cursor.push(&chunk), stats).await?;
                            }
                            Some(Err(e)) => {
                                warn!("Log stream for {}/{} interrupted: {}", namespace, pod, e);
                                // The cut line comes back in full after reconnecting
                                cursor.discard_partial();
                                break;
                            }
                            None => {
                                info!("Log stream for {}/{} ended", namespace, pod);
                                deliver(sink, &cursor.finish(), stats).await?;
                                break;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_interval) => {}
            }
        }

        debug!("Stopped following logs of {}/{}", namespace, pod);
        Ok(())
    }
}

async fn deliver<W>(sink: &mut W, out: &[u8], stats: &LogStreamStats) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    if out.is_empty() {
        return Ok(());
    }
    sink.write_all(out).await?;
    sink.flush().await?;
    stats.bytes.fetch_add(out.len() as u64, Ordering::SeqCst);
    Ok(())
}

fn log_query(since: Option<DateTime<Utc>>) -> Vec<(String, String)> {
    let mut query = vec![
        ("follow".to_string(), "true".to_string()),
        ("timestamps".to_string(), "true".to_string()),
    ];
    if let Some(since) = since {
        query.push((
            "sinceTime".to_string(),
            since.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
    }
    query
}

// ============================================================================
// Line handling (pure)
// ============================================================================

/// Splits `timestamps=true` output into lines, strips the timestamp and
/// remembers the last delivered line to drop what a reconnect replays.
///
/// Lines without a parseable timestamp pass through untouched.
#[derive(Debug, Default)]
struct LineCursor {
    pending: Vec<u8>,
    last: Option<(DateTime<Utc>, Vec<u8>)>,
}

impl LineCursor {
    /// Server timestamp of the last delivered line
    fn since(&self) -> Option<DateTime<Utc>> {
        self.last.as_ref().map(|(ts, _)| *ts)
    }

    /// Feed one chunk, returning the complete lines ready for the sink
    fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line, &mut out);
        }
        out
    }

    /// Stream ended cleanly: release a trailing line without newline
    fn finish(&mut self) -> Vec<u8> {
        let line = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        if !line.is_empty() {
            self.emit(&line, &mut out);
        }
        out
    }

    fn discard_partial(&mut self) {
        self.pending.clear();
    }

    fn emit(&mut self, line: &[u8], out: &mut Vec<u8>) {
        let Some((ts, text)) = split_timestamp(line) else {
            out.extend_from_slice(line);
            return;
        };
        let content = text.strip_suffix(b"\n").unwrap_or(text);

        if let Some((last_ts, last_content)) = &self.last {
            if ts < *last_ts || (ts == *last_ts && content == last_content.as_slice()) {
                return;
            }
        }
        out.extend_from_slice(text);
        self.last = Some((ts, content.to_vec()));
    }
}

fn split_timestamp(line: &[u8]) -> Option<(DateTime<Utc>, &[u8])> {
    let space = line.iter().position(|b| *b == b' ')?;
    let stamp = std::str::from_utf8(&line[..space]).ok()?;
    let ts = DateTime::parse_from_rfc3339(stamp).ok()?;
    Some((ts.with_timezone(&Utc), &line[space + 1..]))
}
