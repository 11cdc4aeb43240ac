// Path: crates/node/src/streams.rs

//! Pipeline stream endpoints exposed by the node.
//!
//! Each endpoint is a pair of channels: callers push requests in, results
//! stream back out. Batch execution goes through the consensus-submit
//! circuit breaker; while it is open, batches fail fast with `Unavailable`
//! and are never silently dropped.

use crate::node::{Node, SUBMIT_DEADLINE};
use async_trait::async_trait;
use hyperraft_pipeline::{
    run_multiplex, run_shard_aggregation, AggregatedShardResult, BatchExecutor, Chunk,
    LargeTransferResponse, MultiplexedBatch, MultiplexedResult, PriorityScheduler, ShardExecutor,
};
use hyperraft_types::error::{ErrorCode, PipelineError};
use hyperraft_types::tx::{PriorityClass, Receipt, ReceiptStatus, Transaction, TxId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// The per-item response on the priority stream.
#[derive(Debug, Clone)]
pub struct PriorityResult {
    /// The transaction this responds to.
    pub tx_id: TxId,
    /// Its scheduling class.
    pub class: PriorityClass,
    /// Whether the pipeline admitted it (commit receipts stream separately).
    pub admitted: bool,
    /// The stable error code when not admitted.
    pub error: Option<String>,
    /// End-to-end pipeline latency, enqueue to response, milliseconds.
    pub actual_latency_ms: f64,
    /// Whether the class SLA was met.
    pub sla_met: bool,
}

/// Executes batches by submitting through the mempool and waiting for
/// finality receipts, under the consensus-submit breaker.
pub(crate) struct SubmitExecutor {
    pub(crate) node: Node,
}

#[async_trait]
impl BatchExecutor for SubmitExecutor {
    async fn execute(&self, txs: Vec<Transaction>) -> Result<Vec<Receipt>, PipelineError> {
        let breaker = self.node.inner.submit_breaker.clone();
        breaker.admit()?;

        enum Pending {
            Waiting(TxId, oneshot::Receiver<Receipt>),
            Done(Receipt),
        }

        let mut pending = Vec::with_capacity(txs.len());
        for tx in txs {
            let tx_id = tx.tx_id;
            match self
                .node
                .submit_transaction(tx, PriorityClass::Normal)
                .await
            {
                Ok(rx) => pending.push(Pending::Waiting(tx_id, rx)),
                Err(e) => pending.push(Pending::Done(Receipt {
                    tx_id,
                    height: 0,
                    status: ReceiptStatus::Rejected(e.code().to_string()),
                })),
            }
        }

        let deadline = Instant::now() + SUBMIT_DEADLINE;
        let mut receipts = Vec::with_capacity(pending.len());
        let mut timed_out = false;
        for entry in pending {
            match entry {
                Pending::Done(receipt) => receipts.push(receipt),
                Pending::Waiting(tx_id, rx) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, rx).await {
                        Ok(Ok(receipt)) => receipts.push(receipt),
                        _ => {
                            timed_out = true;
                            self.node.drop_waiter(&tx_id);
                            receipts.push(Receipt {
                                tx_id,
                                height: 0,
                                status: ReceiptStatus::Rejected(
                                    PipelineError::Timeout(SUBMIT_DEADLINE.as_millis() as u64)
                                        .code()
                                        .to_string(),
                                ),
                            });
                        }
                    }
                }
            }
        }

        if timed_out {
            breaker.record_failure();
        } else {
            breaker.record_success();
        }
        Ok(receipts)
    }
}

impl Node {
    fn executor(&self) -> Arc<SubmitExecutor> {
        Arc::new(SubmitExecutor { node: self.clone() })
    }

    /// The multiplexed bidirectional stream: batches in, one result per
    /// batch out, in arrival order.
    pub fn multiplexed_stream(
        &self,
    ) -> (
        mpsc::Sender<MultiplexedBatch>,
        mpsc::Receiver<MultiplexedResult>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(256);
        let (out_tx, out_rx) = mpsc::channel(256);
        tokio::spawn(run_multiplex(
            in_rx,
            out_tx,
            self.executor(),
            self.inner.batcher.clone(),
        ));
        (in_tx, out_rx)
    }

    /// The adaptive stream: individual transactions in, dynamically sized
    /// batch results out. Batch sizes follow the server-side estimator; no
    /// client configuration is consulted.
    pub fn adaptive_stream(
        &self,
    ) -> (
        mpsc::Sender<Transaction>,
        mpsc::Receiver<MultiplexedResult>,
    ) {
        let (in_tx, mut in_rx) = mpsc::channel::<Transaction>(1024);
        let (out_tx, out_rx) = mpsc::channel(256);
        let executor = self.executor();
        let batcher = self.inner.batcher.clone();

        tokio::spawn(async move {
            let mut batch_id = 0u64;
            let mut buf: Vec<Transaction> = Vec::new();
            let mut closed = false;
            loop {
                if buf.is_empty() {
                    match in_rx.recv().await {
                        Some(tx) => buf.push(tx),
                        None => return,
                    }
                }
                // Top the buffer up to the adaptive target, without
                // stalling a sparse stream.
                let target = batcher.next_size(buf.len() + in_rx.len());
                while buf.len() < target && !closed {
                    match tokio::time::timeout(
                        std::time::Duration::from_millis(1),
                        in_rx.recv(),
                    )
                    .await
                    {
                        Ok(Some(tx)) => buf.push(tx),
                        Ok(None) => closed = true,
                        Err(_) => break,
                    }
                }

                let take = target.min(buf.len());
                let batch: Vec<Transaction> = buf.drain(..take).collect();
                let size = batch.len();
                batch_id += 1;
                let started = Instant::now();
                let receipts = executor.execute(batch).await.unwrap_or_default();
                let processing_us = started.elapsed().as_micros().max(1) as u64;
                batcher.observe_batch(size, processing_us);

                let all_ok = !receipts.is_empty()
                    && receipts.len() == size
                    && receipts.iter().all(Receipt::is_ok);
                let result = MultiplexedResult {
                    batch_id,
                    receipts,
                    processing_us,
                    all_ok,
                    throughput_tps: hyperraft_pipeline::AdaptiveBatcher::throughput_tps(
                        size,
                        processing_us,
                    ),
                };
                if out_tx.send(result).await.is_err() {
                    return;
                }
                if closed && buf.is_empty() {
                    return;
                }
            }
        });
        (in_tx, out_rx)
    }

    /// The priority stream: classed transactions in, admission results out
    /// under strict priority with the 64:1 anti-starvation yield. Commit
    /// receipts stream separately via [`Node::subscribe_receipts`].
    pub fn priority_stream(
        &self,
    ) -> (
        mpsc::Sender<(PriorityClass, Transaction)>,
        mpsc::Receiver<PriorityResult>,
    ) {
        let (in_tx, mut in_rx) = mpsc::channel::<(PriorityClass, Transaction)>(1024);
        let (out_tx, out_rx) = mpsc::channel(1024);
        let node = self.clone();

        tokio::spawn(async move {
            let scheduler: PriorityScheduler<Transaction> = PriorityScheduler::new();
            loop {
                // Pull everything already queued before scheduling.
                while let Ok((class, tx)) = in_rx.try_recv() {
                    scheduler.push(class, tx);
                }
                let Some(scheduled) = scheduler.pop() else {
                    match in_rx.recv().await {
                        Some((class, tx)) => {
                            scheduler.push(class, tx);
                            continue;
                        }
                        None => return,
                    }
                };

                let tx_id = scheduled.item.tx_id;
                let class = scheduled.class;
                let (admitted, error) = match node
                    .submit_transaction(scheduled.item, class)
                    .await
                {
                    Ok(_rx) => (true, None),
                    Err(e) => (false, Some(e.code().to_string())),
                };
                let outcome = node.inner.sla.complete(class, scheduled.enqueued_at);
                let result = PriorityResult {
                    tx_id,
                    class,
                    admitted,
                    error,
                    actual_latency_ms: outcome.actual_latency_ms,
                    sla_met: outcome.sla_met,
                };
                if out_tx.send(result).await.is_err() {
                    return;
                }
            }
        });
        (in_tx, out_rx)
    }

    /// The shard aggregator: executes each shard's transactions and emits
    /// one aggregated result per shard, interleaved across shards, ordered
    /// within each.
    pub fn shard_aggregator(
        &self,
        aggregator_id: String,
        shards: Vec<Vec<Transaction>>,
        filter_shard: Option<u32>,
    ) -> Result<mpsc::Receiver<AggregatedShardResult>, PipelineError> {
        struct VecShardExecutor {
            shards: Vec<Vec<Transaction>>,
            executor: Arc<SubmitExecutor>,
        }

        #[async_trait]
        impl ShardExecutor for VecShardExecutor {
            async fn execute_shard(
                &self,
                shard_id: u32,
            ) -> Result<Vec<Receipt>, PipelineError> {
                let txs = self
                    .shards
                    .get(shard_id as usize)
                    .cloned()
                    .unwrap_or_default();
                self.executor.execute(txs).await
            }
        }

        let num_shards = shards.len() as u32;
        run_shard_aggregation(
            aggregator_id,
            num_shards,
            filter_shard,
            Arc::new(VecShardExecutor {
                shards,
                executor: self.executor(),
            }),
        )
    }

    /// Accepts one chunk of a large transfer.
    pub fn large_transfer_chunk(&self, chunk: Chunk) -> Result<(), PipelineError> {
        self.inner
            .reassembler
            .accept(chunk)
            .map_err(PipelineError::InvalidInput)
    }

    /// Completes a large transfer on stream end.
    pub fn large_transfer_complete(&self, transfer_id: &str) -> LargeTransferResponse {
        self.inner
            .reassembler
            .complete(transfer_id, self.inner.crypto.as_ref())
    }
}
