//! Kuberun Ops: log access for logical services.
//!
//! History is fetched up front and replayed through a [`LogStream`]; live
//! tails are pumped from every matching pod into the same stream shape.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use kuberun_core::{sanitize, LogsOptions};
use kuberun_kubehub::{ClientResult, ClusterClient, Labels, LogByteStream, NativeKind, PodLogParams};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// One log line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    pub message: String,
    pub metadata: BTreeMap<String, String>,
}

impl LogRecord {
    pub fn new(message: impl Into<String>, pod: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("pod".to_string(), pod.to_string());
        Self { message: message.into(), metadata }
    }
}

/// Cancellation handle for a producer task. Cancelling twice is a no-op.
#[derive(Debug, Default)]
pub struct CancelHandle {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl CancelHandle {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Mutex::new(Some(tx)) }, rx)
    }

    /// Returns true only for the call that actually signalled the producer.
    pub fn cancel(&self) -> bool {
        let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool { self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none() }
}

/// Channel-backed record stream with a terminal error slot.
///
/// The producer owns the only sender, so the channel closes exactly once,
/// when the producer exits after end-of-input or `stop`.
pub struct LogStream {
    rx: mpsc::Receiver<LogRecord>,
    error: Arc<Mutex<Option<String>>>,
    cancel: CancelHandle,
}

impl LogStream {
    pub fn chan(&mut self) -> &mut mpsc::Receiver<LogRecord> { &mut self.rx }

    pub async fn recv(&mut self) -> Option<LogRecord> { self.rx.recv().await }

    /// Terminal error reported by the producer, if any.
    pub fn error(&self) -> Option<String> { self.error.lock().unwrap_or_else(|e| e.into_inner()).clone() }

    pub fn stop(&self) {
        if self.cancel.cancel() {
            debug!("log stream stopped");
        }
    }

    pub fn is_stopped(&self) -> bool { self.cancel.is_cancelled() }
}

impl Drop for LogStream {
    fn drop(&mut self) { self.cancel.cancel(); }
}

/// Replay buffered records from a single producer task, checking for stop
/// before every record.
pub fn replay(records: Vec<LogRecord>, cap: usize) -> LogStream {
    let (tx, rx) = mpsc::channel::<LogRecord>(cap.max(1));
    let (cancel, mut cancel_rx) = CancelHandle::new();
    let total = records.len();
    tokio::spawn(async move {
        let mut sent = 0usize;
        for record in records {
            match cancel_rx.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => {}
                _ => break,
            }
            tokio::select! {
                biased;
                _ = &mut cancel_rx => break,
                res = tx.send(record) => { if res.is_err() { break; } }
            }
            sent += 1;
        }
        debug!(sent, total, "log replay finished");
    });
    LogStream { rx, error: Arc::new(Mutex::new(None)), cancel }
}

/// Internal: consume per-pod byte streams, split into lines, send via bounded channel.
/// Drops lines when the channel is full. Flushes partial lines on end.
async fn pump_bytes_to_lines<S>(stream: S, tx: mpsc::Sender<LogRecord>, mut cancel_rx: oneshot::Receiver<()>, error: Arc<Mutex<Option<String>>>)
where
    S: futures::Stream<Item = (String, ClientResult<Bytes>)>,
{
    let stream = stream.fuse();
    futures::pin_mut!(stream);
    let mut bufs: HashMap<String, BytesMut> = HashMap::new();
    let emit = |pod: &str, line: &[u8]| {
        if let Ok(s) = std::str::from_utf8(line) {
            let _ = tx.try_send(LogRecord::new(s, pod));
        }
    };
    loop {
        tokio::select! {
            _ = &mut cancel_rx => { info!("log pump cancelled"); break; }
            next = stream.next() => {
                match next {
                    Some((pod, Ok(chunk))) => {
                        let buf = bufs.entry(pod.clone()).or_default();
                        buf.extend_from_slice(&chunk);
                        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                            let line = buf.split_to(pos);
                            let _ = buf.split_to(1); // drop '\n'
                            emit(&pod, &line);
                        }
                    }
                    Some((pod, Err(e))) => {
                        warn!(pod = %pod, error = %e, "log stream error");
                        *error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                        break;
                    }
                    None => break,
                }
            }
        }
    }
    for (pod, buf) in bufs {
        if !buf.is_empty() { emit(&pod, &buf); }
    }
    info!("log pump ended");
}

/// Log accessor for every pod of one logical service.
pub struct ServiceLogs {
    client: Arc<dyn ClusterClient>,
    service: String,
    namespace: String,
    params: PodLogParams,
    queue_cap: usize,
}

impl ServiceLogs {
    pub fn new(client: Arc<dyn ClusterClient>, service: &str, opts: &LogsOptions, queue_cap: usize) -> Self {
        let params = PodLogParams { follow: opts.stream, tail_lines: opts.count, since_seconds: opts.since, container: None };
        Self { client, service: service.to_string(), namespace: sanitize(&opts.namespace), params, queue_cap }
    }

    pub fn follows(&self) -> bool { self.params.follow }

    async fn pods(&self) -> ClientResult<Vec<String>> {
        let mut selector = Labels::new();
        selector.insert("name".into(), sanitize(&self.service));
        let mut names: Vec<String> = self
            .client
            .list(NativeKind::Pod, Some(&self.namespace), &selector)
            .await?
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Fetch history from every pod, one record per line, pods in name order.
    pub async fn read(&self) -> ClientResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        for pod in self.pods().await? {
            let text = self.client.pod_logs(&self.namespace, &pod, &self.params).await?;
            records.extend(text.lines().map(|l| LogRecord::new(l, &pod)));
        }
        debug!(service = %self.service, count = records.len(), "read log history");
        Ok(records)
    }

    /// Follow every pod; opening any pod's tail failing fails the whole call.
    pub async fn stream(&self) -> ClientResult<LogStream> {
        let mut tails = Vec::new();
        for pod in self.pods().await? {
            let tail: LogByteStream = self.client.pod_log_stream(&self.namespace, &pod, &self.params).await?;
            tails.push(tail.map(move |item| (pod.clone(), item)).boxed());
        }
        info!(service = %self.service, pods = tails.len(), "log stream starting");
        let (tx, rx) = mpsc::channel::<LogRecord>(self.queue_cap.max(1));
        let (cancel, cancel_rx) = CancelHandle::new();
        let error = Arc::new(Mutex::new(None));
        tokio::spawn(pump_bytes_to_lines(futures::stream::select_all(tails), tx, cancel_rx, error.clone()));
        Ok(LogStream { rx, error, cancel })
    }
}
