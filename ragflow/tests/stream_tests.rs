//! Backpressure, throughput and failure handling of the stream processor.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{TemplateGenerator, pipeline_builder, retrieval_stage, seed};
use ragflow::{
    BatchProcessor, FixedSizeChunker, GenerationConfig, IngestProcessor, IngestRequest,
    ProcessorState, QueryProcessor, QueryRequest, RagError, Result, StreamConfig, StreamProcessor,
    VectorStore,
};
use tokio::sync::{Notify, Semaphore, mpsc};

/// Counts items; each batch waits for a permit from `gate`.
struct Gated {
    gate: Arc<Semaphore>,
    started: Arc<Notify>,
    items: AtomicUsize,
}

#[async_trait]
impl BatchProcessor for Gated {
    type Item = usize;

    async fn process_batch(&self, batch: Vec<usize>) -> Result<()> {
        self.started.notify_one();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RagError::Processing(e.to_string()))?;
        permit.forget();
        self.items.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn full_queue_blocks_the_next_producer() {
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(Notify::new());
    let processor =
        Gated { gate: gate.clone(), started: started.clone(), items: AtomicUsize::new(0) };
    let config = StreamConfig::builder().buffer_size(5).batch_size(1).build().unwrap();
    let stream = Arc::new(StreamProcessor::new(processor, config).unwrap());
    stream.initialize().await.unwrap();

    // The consumer takes the first item and parks on the gate.
    stream.process(0).await.unwrap();
    started.notified().await;

    for i in 1..=5 {
        stream.process(i).await.unwrap();
    }
    assert_eq!(stream.metrics().await.queue_size, 5);
    assert!(matches!(stream.try_process(99).await, Err(RagError::Processing(_))));

    let blocked = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.process(6).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished(), "sixth queued item should wait for space");

    gate.add_permits(1);
    blocked.await.unwrap().unwrap();

    gate.add_permits(100);
    stream.drain().await.unwrap();
    assert_eq!(stream.metrics().await.processed_items, 7);
}

struct Counting {
    batches: Arc<std::sync::Mutex<Vec<usize>>>,
    fail_on: Option<usize>,
}

#[async_trait]
impl BatchProcessor for Counting {
    type Item = usize;

    async fn process_batch(&self, batch: Vec<usize>) -> Result<()> {
        if self.fail_on.is_some_and(|bad| batch.contains(&bad)) {
            return Err(RagError::Processing("poisoned item".into()));
        }
        self.batches.lock().unwrap().push(batch.len());
        Ok(())
    }
}

#[tokio::test]
async fn twelve_items_in_batches_of_two() {
    let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
    let config = StreamConfig::builder().buffer_size(20).batch_size(2).build().unwrap();
    let stream =
        StreamProcessor::new(Counting { batches: batches.clone(), fail_on: None }, config).unwrap();
    stream.initialize().await.unwrap();

    for i in 0..12 {
        stream.process(i).await.unwrap();
    }
    stream.drain().await.unwrap();

    let metrics = stream.metrics().await;
    assert_eq!(metrics.processed_items, 12);
    assert_eq!(metrics.processing_errors, 0);
    assert!(batches.lock().unwrap().iter().all(|&size| size <= 2));
}

#[tokio::test]
async fn failed_batch_is_counted_and_dropped() {
    let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
    let config = StreamConfig::builder()
        .batch_size(1)
        .error_backoff(Duration::from_millis(1))
        .build()
        .unwrap();
    let stream =
        StreamProcessor::new(Counting { batches: batches.clone(), fail_on: Some(3) }, config)
            .unwrap();
    stream.initialize().await.unwrap();

    for i in 0..6 {
        stream.process(i).await.unwrap();
    }
    stream.drain().await.unwrap();

    let metrics = stream.metrics().await;
    assert_eq!(metrics.processing_errors, 1);
    assert_eq!(metrics.processed_items, 5);
    assert_eq!(metrics.processed_batches, 5);
}

#[tokio::test]
async fn stop_discards_queued_items() {
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(Notify::new());
    let processor =
        Gated { gate: gate.clone(), started: started.clone(), items: AtomicUsize::new(0) };
    let config = StreamConfig::builder().buffer_size(10).batch_size(1).build().unwrap();
    let stream = Arc::new(StreamProcessor::new(processor, config).unwrap());
    stream.initialize().await.unwrap();

    stream.process(0).await.unwrap();
    started.notified().await;
    for i in 1..5 {
        stream.process(i).await.unwrap();
    }

    let stopping = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.stop().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.add_permits(100);
    stopping.await.unwrap().unwrap();

    // Only the batch that was in flight completed.
    assert_eq!(stream.processor().items.load(Ordering::SeqCst), 1);
    assert!(matches!(stream.process(9).await, Err(RagError::Processing(_))));
}

#[tokio::test]
async fn stop_drops_a_partially_filled_batch() {
    let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
    let config = StreamConfig::builder()
        .batch_size(5)
        .batch_timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let stream =
        StreamProcessor::new(Counting { batches: batches.clone(), fail_on: None }, config).unwrap();
    stream.initialize().await.unwrap();

    stream.process(0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::time::timeout(Duration::from_secs(1), stream.stop())
        .await
        .expect("stop should not wait for the batch timeout")
        .unwrap();

    assert!(batches.lock().unwrap().is_empty());
    assert_eq!(stream.metrics().await.processed_items, 0);
}

#[tokio::test]
async fn metrics_and_process_answer_during_a_slow_drain() {
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(Notify::new());
    let processor =
        Gated { gate: gate.clone(), started: started.clone(), items: AtomicUsize::new(0) };
    let config = StreamConfig::builder().buffer_size(10).batch_size(1).build().unwrap();
    let stream = Arc::new(StreamProcessor::new(processor, config).unwrap());
    stream.initialize().await.unwrap();

    stream.process(0).await.unwrap();
    started.notified().await;
    for i in 1..4 {
        stream.process(i).await.unwrap();
    }

    let draining = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.drain().await })
    };
    let quick = Duration::from_millis(200);
    tokio::time::timeout(quick, async {
        while stream.state().await != ProcessorState::Stopped {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("state should be readable while draining");

    let metrics = tokio::time::timeout(quick, stream.metrics()).await.expect("metrics blocked");
    assert_eq!(metrics.queue_size, 3);
    let refused = tokio::time::timeout(quick, stream.process(9)).await.expect("process blocked");
    assert!(matches!(refused, Err(RagError::Processing(_))));
    assert!(!draining.is_finished());

    gate.add_permits(100);
    draining.await.unwrap().unwrap();
    assert_eq!(stream.processor().items.load(Ordering::SeqCst), 4);
    assert_eq!(stream.metrics().await.queue_size, 0);
}

/// Sleeps for a fixed time per batch.
struct Sleepy(Duration);

#[async_trait]
impl BatchProcessor for Sleepy {
    type Item = usize;

    async fn process_batch(&self, _batch: Vec<usize>) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

#[tokio::test]
async fn average_latency_tracks_batch_time() {
    let config = StreamConfig::builder().batch_size(2).build().unwrap();
    let stream = StreamProcessor::new(Sleepy(Duration::from_millis(10)), config).unwrap();
    stream.initialize().await.unwrap();
    assert_eq!(stream.metrics().await.average_latency, Duration::ZERO);

    for i in 0..4 {
        stream.process(i).await.unwrap();
    }
    stream.drain().await.unwrap();

    let metrics = stream.metrics().await;
    assert_eq!(metrics.processed_items, 4);
    assert!(metrics.processed_batches >= 2);
    assert!(metrics.average_latency >= Duration::from_millis(10), "{:?}", metrics.average_latency);
}

#[tokio::test]
async fn ingest_processor_fills_the_collection() {
    let stage = retrieval_stage(10).await;
    let chunker = Arc::new(FixedSizeChunker::new(4, 1).unwrap());
    let config = StreamConfig::builder().batch_size(3).build().unwrap();
    let stream = StreamProcessor::new(IngestProcessor::new(stage.clone(), chunker), config).unwrap();
    stream.initialize().await.unwrap();

    for (id, text) in common::CORPUS {
        stream.process(IngestRequest::new(id, text).with_metadata("source", "test")).await.unwrap();
    }
    stream.drain().await.unwrap();

    assert_eq!(stream.metrics().await.processed_items, 4);
    let stored = stage.store().count("docs").await.unwrap();
    assert!(stored >= 4);
    let first = stage.store().get("docs", &["ownership_0"]).await.unwrap();
    assert_eq!(first[0].metadata["document_id"], "ownership");
    assert_eq!(first[0].metadata["source"], "test");
}

#[tokio::test]
async fn query_processor_delivers_every_outcome() {
    let pipeline = Arc::new(
        pipeline_builder(2)
            .generation(GenerationConfig::default(), Arc::new(TemplateGenerator))
            .build()
            .unwrap(),
    );
    seed(&pipeline).await;

    let (tx, mut rx) = mpsc::channel(16);
    let config = StreamConfig::builder().batch_size(4).build().unwrap();
    let stream = StreamProcessor::new(QueryProcessor::new(pipeline, tx), config).unwrap();
    stream.initialize().await.unwrap();

    for i in 0..5 {
        stream.process(QueryRequest::new(format!("q{i}"), "rust memory")).await.unwrap();
    }
    stream.drain().await.unwrap();
    drop(stream);

    let mut seen = Vec::new();
    while let Some(outcome) = rx.recv().await {
        let response = outcome.result.unwrap();
        assert_eq!(response.response_text, "rust memory (2 documents)");
        seen.push(outcome.id);
    }
    seen.sort();
    assert_eq!(seen, vec!["q0", "q1", "q2", "q3", "q4"]);
}
