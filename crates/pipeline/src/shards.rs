// Path: crates/pipeline/src/shards.rs

//! Shard fan-out aggregation.
//!
//! The server opens one logical fan-out per shard and emits one
//! `AggregatedShardResult` per shard as it completes. Results from
//! different shards may interleave; within a shard, result order is
//! preserved. The aggregation completes when every selected shard has
//! emitted.

use async_trait::async_trait;
use hyperraft_types::error::PipelineError;
use hyperraft_types::tx::Receipt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The per-shard emission.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AggregatedShardResult {
    /// The aggregation this belongs to.
    pub aggregator_id: String,
    /// The emitting shard.
    pub shard_id: u32,
    /// The shard's results, in shard order.
    pub results: Vec<Receipt>,
    /// Total shards in the aggregation, for client-side completion checks.
    pub total_shards: u32,
}

/// Executes the work routed to one shard.
#[async_trait]
pub trait ShardExecutor: Send + Sync {
    /// Produces the shard's results, in order.
    async fn execute_shard(&self, shard_id: u32) -> Result<Vec<Receipt>, PipelineError>;
}

/// Runs the fan-out for `num_shards` shards (or only `filter_shard` when
/// set), streaming one result per shard into the returned receiver.
pub fn run_shard_aggregation(
    aggregator_id: String,
    num_shards: u32,
    filter_shard: Option<u32>,
    executor: Arc<dyn ShardExecutor>,
) -> Result<mpsc::Receiver<AggregatedShardResult>, PipelineError> {
    if num_shards == 0 {
        return Err(PipelineError::InvalidInput("num_shards must be > 0".into()));
    }
    if let Some(filter) = filter_shard {
        if filter >= num_shards {
            return Err(PipelineError::InvalidInput(format!(
                "filter_shard {filter} out of range 0..{num_shards}"
            )));
        }
    }

    let shard_ids: Vec<u32> = match filter_shard {
        Some(only) => vec![only],
        None => (0..num_shards).collect(),
    };
    let (out_tx, out_rx) = mpsc::channel(shard_ids.len().max(1));

    for shard_id in shard_ids {
        let executor = executor.clone();
        let out = out_tx.clone();
        let aggregator_id = aggregator_id.clone();
        tokio::spawn(async move {
            let results = match executor.execute_shard(shard_id).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(
                        target: "pipeline",
                        aggregator_id,
                        shard_id,
                        error = %e,
                        "shard failed"
                    );
                    Vec::new()
                }
            };
            let _ = out
                .send(AggregatedShardResult {
                    aggregator_id,
                    shard_id,
                    results,
                    total_shards: num_shards,
                })
                .await;
        });
    }
    // Receiver completes when the last shard task drops its sender clone.
    Ok(out_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperraft_types::tx::{ReceiptStatus, TxId};
    use std::collections::HashSet;

    struct StubExecutor;

    #[async_trait]
    impl ShardExecutor for StubExecutor {
        async fn execute_shard(&self, shard_id: u32) -> Result<Vec<Receipt>, PipelineError> {
            // Stagger completions so shard results interleave.
            tokio::time::sleep(std::time::Duration::from_millis(u64::from(shard_id % 3)))
                .await;
            Ok((0..2)
                .map(|i| Receipt {
                    tx_id: TxId([shard_id as u8 * 10 + i; 32]),
                    height: u64::from(shard_id),
                    status: ReceiptStatus::Applied,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn all_shards_emit_exactly_once() {
        let mut rx =
            run_shard_aggregation("agg-1".into(), 4, None, Arc::new(StubExecutor)).unwrap();
        let mut seen = HashSet::new();
        while let Some(result) = rx.recv().await {
            assert_eq!(result.total_shards, 4);
            assert_eq!(result.results.len(), 2);
            assert!(seen.insert(result.shard_id));
        }
        assert_eq!(seen, (0..4).collect::<HashSet<u32>>());
    }

    #[tokio::test]
    async fn filtered_aggregation_emits_only_that_shard() {
        let mut rx =
            run_shard_aggregation("agg-2".into(), 4, Some(2), Arc::new(StubExecutor)).unwrap();
        let result = rx.recv().await.unwrap();
        assert_eq!(result.shard_id, 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn invalid_filter_rejected() {
        let err = run_shard_aggregation("agg-3".into(), 2, Some(5), Arc::new(StubExecutor))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
