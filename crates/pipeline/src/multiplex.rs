// Path: crates/pipeline/src/multiplex.rs

//! Multiplexed bidirectional batch streams.
//!
//! One response is emitted per ingress batch, in the order batches arrived
//! on the stream. Batches are executed through the [`BatchExecutor`] port,
//! which the node wires to consensus submission behind a circuit breaker.

use crate::batcher::AdaptiveBatcher;
use async_trait::async_trait;
use hyperraft_types::error::PipelineError;
use hyperraft_types::tx::{Receipt, Transaction, MAX_BATCH};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// One ingress batch on a multiplexed stream.
#[derive(Encode, Decode, Debug, Clone)]
pub struct MultiplexedBatch {
    /// Stream-scoped batch identifier, echoed in the response.
    pub batch_id: u64,
    /// The transactions to execute.
    pub txs: Vec<Transaction>,
}

/// The response for one batch.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone)]
pub struct MultiplexedResult {
    /// The batch this responds to.
    pub batch_id: u64,
    /// One receipt per transaction, in batch order.
    pub receipts: Vec<Receipt>,
    /// Wall-clock service time, microseconds.
    pub processing_us: u64,
    /// True iff every transaction reached a non-error receipt.
    pub all_ok: bool,
    /// `size · 10⁶ / processing_us`.
    pub throughput_tps: u64,
}

/// Executes one batch downstream and returns its receipts in order.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Runs the transactions to completion and returns one receipt each.
    async fn execute(&self, txs: Vec<Transaction>) -> Result<Vec<Receipt>, PipelineError>;
}

/// Drives one multiplexed stream: reads batches from `ingress`, executes
/// them sequentially (preserving per-stream response order), and writes
/// results to `egress`. Returns when the ingress closes.
pub async fn run_multiplex(
    mut ingress: mpsc::Receiver<MultiplexedBatch>,
    egress: mpsc::Sender<MultiplexedResult>,
    executor: Arc<dyn BatchExecutor>,
    batcher: Arc<AdaptiveBatcher>,
) {
    while let Some(batch) = ingress.recv().await {
        let batch_id = batch.batch_id;
        let size = batch.txs.len();
        if size > MAX_BATCH {
            tracing::warn!(target: "pipeline", batch_id, size, "batch over size cap rejected");
            let result = MultiplexedResult {
                batch_id,
                receipts: Vec::new(),
                processing_us: 1,
                all_ok: false,
                throughput_tps: 0,
            };
            if egress.send(result).await.is_err() {
                return;
            }
            continue;
        }
        let started = Instant::now();

        let receipts = match executor.execute(batch.txs).await {
            Ok(receipts) => receipts,
            Err(e) => {
                tracing::warn!(target: "pipeline", batch_id, error = %e, "batch failed");
                Vec::new()
            }
        };
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
            throughput_tps: AdaptiveBatcher::throughput_tps(size, processing_us),
        };
        if egress.send(result).await.is_err() {
            // Client went away; nothing left to respond to.
            return;
        }
    }
}
