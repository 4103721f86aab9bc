//! Bounded-queue batch execution with backpressure.
//!
//! A [`StreamProcessor`] owns one consumer task that pulls items from a
//! bounded channel, groups them into batches and hands each batch to a
//! [`BatchProcessor`]. Producers calling [`StreamProcessor::process`] wait
//! while the queue is full.
//!
//! ```rust,ignore
//! let ingest = IngestProcessor::new(stage, Arc::new(FixedSizeChunker::new(200, 20)?));
//! let stream = StreamProcessor::new(ingest, StreamConfig::default())?;
//! stream.initialize().await?;
//! stream.process(IngestRequest::new("doc-1", text)).await?;
//! stream.drain().await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunking::Chunker;
use crate::document::Metadata;
use crate::error::{RagError, Result};
use crate::pipeline::{Pipeline, PipelineResponse};
use crate::retrieval::RetrievalStage;

/// Queue and batching parameters for a [`StreamProcessor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Queue capacity. Producers wait once this many items are pending.
    pub buffer_size: usize,
    /// Maximum items per batch.
    pub batch_size: usize,
    /// How long the consumer waits to fill a batch once it holds one item.
    #[serde(with = "crate::config::duration_ms")]
    pub batch_timeout: Duration,
    /// Pause after a failed batch before the consumer resumes.
    #[serde(with = "crate::config::duration_ms")]
    pub error_backoff: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            batch_size: 10,
            batch_timeout: Duration::from_millis(100),
            error_backoff: Duration::from_millis(100),
        }
    }
}

impl StreamConfig {
    /// Create a new [`StreamConfigBuilder`].
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    /// Validate queue and batch sizes.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(RagError::config("buffer_size must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(RagError::config("batch_size must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`StreamConfig`].
#[derive(Debug, Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    /// Set the queue capacity.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set the maximum batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the batch fill timeout.
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch_timeout = timeout;
        self
    }

    /// Set the pause after a failed batch.
    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.config.error_backoff = backoff;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if a size is zero.
    pub fn build(self) -> Result<StreamConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Work that a [`StreamProcessor`] runs one batch at a time.
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    /// The queued item type.
    type Item: Send + 'static;

    /// Prepare resources before the first batch.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Process one batch. An error discards the whole batch.
    async fn process_batch(&self, batch: Vec<Self::Item>) -> Result<()>;

    /// Release resources after the last batch.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// A short name used in logs.
    fn name(&self) -> &str {
        "batch-processor"
    }
}

/// Lifecycle of a [`StreamProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Constructed, not yet initialized.
    Created,
    /// The batch processor is initialized but the consumer is not running.
    Initialized,
    /// Accepting and processing items.
    Running,
    /// Drained or stopped. Terminal.
    Stopped,
}

/// A point-in-time snapshot of a [`StreamProcessor`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamMetrics {
    /// Items in batches that completed successfully.
    pub processed_items: u64,
    /// Batches that failed and were discarded.
    pub processing_errors: u64,
    /// Batches that completed successfully.
    pub processed_batches: u64,
    /// Items currently waiting in the queue.
    pub queue_size: usize,
    /// Mean wall-clock time of a successful batch.
    pub average_latency: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    processed_items: AtomicU64,
    processing_errors: AtomicU64,
    processed_batches: AtomicU64,
    total_latency_micros: AtomicU64,
    queued: AtomicUsize,
}

impl Counters {
    fn record_success(&self, items: usize, latency: Duration) {
        self.processed_items.fetch_add(items as u64, Ordering::Relaxed);
        self.processed_batches.fetch_add(1, Ordering::Relaxed);
        self.total_latency_micros.fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn dequeued(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }
}

struct Handle<T> {
    state: ProcessorState,
    sender: Option<mpsc::Sender<T>>,
    worker: Option<JoinHandle<()>>,
}

/// Drives a [`BatchProcessor`] from a bounded queue.
///
/// State moves `Created -> Initialized -> Running -> Stopped`. Items can
/// only be queued while running. Batch failures are logged, counted and
/// dropped; they never reach the producer whose item was in the batch.
pub struct StreamProcessor<P: BatchProcessor> {
    config: StreamConfig,
    processor: Arc<P>,
    counters: Arc<Counters>,
    token: CancellationToken,
    handle: Mutex<Handle<P::Item>>,
}

impl<P: BatchProcessor> StreamProcessor<P> {
    /// Wrap `processor`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `config` is invalid.
    pub fn new(processor: P, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            processor: Arc::new(processor),
            counters: Arc::new(Counters::default()),
            token: CancellationToken::new(),
            handle: Mutex::new(Handle { state: ProcessorState::Created, sender: None, worker: None }),
        })
    }

    /// The stream configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The wrapped batch processor.
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// The current lifecycle state.
    pub async fn state(&self) -> ProcessorState {
        self.handle.lock().await.state
    }

    /// Initialize the batch processor and start the consumer task.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Processing`] unless the processor is freshly
    /// created, or the batch processor's own initialization error.
    pub async fn initialize(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        if handle.state != ProcessorState::Created {
            return Err(RagError::Processing(format!(
                "cannot initialize a stream processor in state {:?}",
                handle.state
            )));
        }

        self.processor.initialize().await?;
        handle.state = ProcessorState::Initialized;

        let (sender, receiver) = mpsc::channel(self.config.buffer_size);
        let worker = tokio::spawn(consume(
            Arc::clone(&self.processor),
            receiver,
            self.config.clone(),
            Arc::clone(&self.counters),
            self.token.clone(),
        ));
        handle.sender = Some(sender);
        handle.worker = Some(worker);
        handle.state = ProcessorState::Running;

        info!(
            processor = self.processor.name(),
            buffer_size = self.config.buffer_size,
            batch_size = self.config.batch_size,
            "stream processor started"
        );
        Ok(())
    }

    async fn sender(&self) -> Result<mpsc::Sender<P::Item>> {
        let handle = self.handle.lock().await;
        match (&handle.state, &handle.sender) {
            (ProcessorState::Running, Some(sender)) => Ok(sender.clone()),
            (state, _) => Err(RagError::Processing(format!("stream processor is not running ({state:?})"))),
        }
    }

    /// Queue one item, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Processing`] if the processor is not running or
    /// stops while the caller is waiting.
    pub async fn process(&self, item: P::Item) -> Result<()> {
        let sender = self.sender().await?;
        let permit = sender
            .reserve()
            .await
            .map_err(|_| RagError::Processing("stream processor stopped".to_string()))?;
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        permit.send(item);
        Ok(())
    }

    /// Queue one item without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Processing`] if the queue is full or the
    /// processor is not running.
    pub async fn try_process(&self, item: P::Item) -> Result<()> {
        let sender = self.sender().await?;
        let permit = sender.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => RagError::Processing("stream queue is full".to_string()),
            mpsc::error::TrySendError::Closed(()) => {
                RagError::Processing("stream processor stopped".to_string())
            }
        })?;
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        permit.send(item);
        Ok(())
    }

    /// Snapshot the counters.
    pub async fn metrics(&self) -> StreamMetrics {
        let batches = self.counters.processed_batches.load(Ordering::Relaxed);
        let total = self.counters.total_latency_micros.load(Ordering::Relaxed);
        StreamMetrics {
            processed_items: self.counters.processed_items.load(Ordering::Relaxed),
            processing_errors: self.counters.processing_errors.load(Ordering::Relaxed),
            processed_batches: batches,
            queue_size: self.counters.queued.load(Ordering::Relaxed),
            average_latency: if batches == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(total / batches)
            },
        }
    }

    /// Stop accepting items, process everything already queued, then clean up.
    ///
    /// Other calls keep working while the queue drains: `process` fails
    /// straight away and `metrics` reports progress.
    pub async fn drain(&self) -> Result<()> {
        self.shutdown(false).await
    }

    /// Stop immediately. The batch in flight finishes; queued items and any
    /// partially filled batch are dropped.
    ///
    /// Calling `stop` during a `drain` cuts the drain short.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown(true).await
    }

    async fn shutdown(&self, cancel: bool) -> Result<()> {
        let (was_running, worker) = {
            let mut handle = self.handle.lock().await;
            if cancel {
                self.token.cancel();
            }
            if handle.state == ProcessorState::Stopped {
                return Ok(());
            }
            let was_running = handle.state == ProcessorState::Running;
            handle.state = ProcessorState::Stopped;
            handle.sender = None;
            (was_running, handle.worker.take())
        };

        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| RagError::Processing(format!("stream consumer task failed: {e}")))?;
        }

        if was_running {
            self.processor.cleanup().await?;
        }
        let metrics = self.metrics().await;
        info!(
            processor = self.processor.name(),
            cancelled = cancel,
            processed_items = metrics.processed_items,
            processing_errors = metrics.processing_errors,
            "stream processor stopped"
        );
        Ok(())
    }
}

async fn consume<P: BatchProcessor>(
    processor: Arc<P>,
    mut receiver: mpsc::Receiver<P::Item>,
    config: StreamConfig,
    counters: Arc<Counters>,
    token: CancellationToken,
) {
    'consume: loop {
        let first = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            item = receiver.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        counters.dequeued();

        let mut batch = Vec::with_capacity(config.batch_size);
        batch.push(first);
        let deadline = Instant::now() + config.batch_timeout;
        while batch.len() < config.batch_size {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(processor = processor.name(), discarded = batch.len(), "dropping partial batch");
                    break 'consume;
                }
                item = tokio::time::timeout_at(deadline, receiver.recv()) => match item {
                    Ok(Some(item)) => {
                        counters.dequeued();
                        batch.push(item);
                    }
                    Ok(None) | Err(_) => break,
                },
            }
        }

        let size = batch.len();
        let started = Instant::now();
        match processor.process_batch(batch).await {
            Ok(()) => {
                counters.record_success(size, started.elapsed());
                debug!(processor = processor.name(), batch_size = size, "batch processed");
            }
            Err(e) => {
                counters.record_failure();
                warn!(processor = processor.name(), batch_size = size, error = %e, "batch failed, discarding");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(config.error_backoff) => {}
                }
            }
        }
    }

    // Whatever is still queued goes down with the receiver.
    drop(receiver);
    counters.queued.store(0, Ordering::Relaxed);
}

/// A document queued for [`IngestProcessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRequest {
    /// Parent document id. Chunks are stored as `{document_id}_{i}`.
    pub document_id: String,
    /// Full document text.
    pub text: String,
    /// Metadata copied onto every chunk.
    pub metadata: Metadata,
}

impl IngestRequest {
    /// Create a request with empty metadata.
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { document_id: document_id.into(), text: text.into(), metadata: Metadata::new() }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Chunks and stores documents through a [`RetrievalStage`].
pub struct IngestProcessor {
    stage: Arc<RetrievalStage>,
    chunker: Arc<dyn Chunker>,
}

impl IngestProcessor {
    /// Ingest into `stage`'s collection, splitting with `chunker`.
    pub fn new(stage: Arc<RetrievalStage>, chunker: Arc<dyn Chunker>) -> Self {
        Self { stage, chunker }
    }
}

#[async_trait]
impl BatchProcessor for IngestProcessor {
    type Item = IngestRequest;

    async fn process_batch(&self, batch: Vec<IngestRequest>) -> Result<()> {
        for request in &batch {
            self.stage
                .ingest(&request.document_id, &request.text, &request.metadata, self.chunker.as_ref())
                .await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ingest"
    }
}

/// A query queued for [`QueryProcessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Caller-chosen id echoed in the [`QueryOutcome`].
    pub id: String,
    /// The query text.
    pub query: String,
    /// Caller context passed to [`Pipeline::process`].
    pub metadata: Metadata,
}

impl QueryRequest {
    /// Create a request with empty metadata.
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self { id: id.into(), query: query.into(), metadata: Metadata::new() }
    }
}

/// The answer to one [`QueryRequest`].
#[derive(Debug)]
pub struct QueryOutcome {
    /// The request id.
    pub id: String,
    /// The pipeline response or its error.
    pub result: Result<PipelineResponse>,
}

/// Runs queries through a [`Pipeline`] and sends each outcome to a channel.
///
/// Queries within a batch run concurrently. Every outcome is sent, failed
/// ones included; a batch with any failure is then reported as failed.
pub struct QueryProcessor {
    pipeline: Arc<Pipeline>,
    output: mpsc::Sender<QueryOutcome>,
}

impl QueryProcessor {
    /// Answer queries with `pipeline`, delivering outcomes to `output`.
    pub fn new(pipeline: Arc<Pipeline>, output: mpsc::Sender<QueryOutcome>) -> Self {
        Self { pipeline, output }
    }
}

#[async_trait]
impl BatchProcessor for QueryProcessor {
    type Item = QueryRequest;

    async fn process_batch(&self, batch: Vec<QueryRequest>) -> Result<()> {
        let total = batch.len();
        let outcomes = join_all(batch.into_iter().map(|request| async move {
            let result = self.pipeline.process(&request.query, request.metadata).await;
            QueryOutcome { id: request.id, result }
        }))
        .await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        for outcome in outcomes {
            self.output
                .send(outcome)
                .await
                .map_err(|_| RagError::Processing("query output channel closed".to_string()))?;
        }

        if failed > 0 {
            return Err(RagError::Processing(format!("{failed} of {total} queries failed")));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "query"
    }
}
