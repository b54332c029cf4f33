use crate::db::insert_batch;
use crate::errors::Result;
use crate::metrics::{BATCH_SIZE, INGEST_LATENCY_SECONDS, RECORDS_DROPPED_TOTAL};
use crate::model::MeasurementRecord;
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Destination of flushed batches. Retries, if any, belong to the sink.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn write(&self, batch: &[MeasurementRecord]) -> Result<()>;
}

#[async_trait]
impl BatchSink for PgPool {
    async fn write(&self, batch: &[MeasurementRecord]) -> Result<()> {
        insert_batch(self, batch).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_records: usize,
    pub max_wait: Duration,
}

impl BatchLimits {
    pub fn new(max_records: usize, max_wait_ms: u64) -> Self {
        Self {
            max_records: max_records.max(1),
            max_wait: Duration::from_millis(max_wait_ms.max(1)),
        }
    }
}

/// What a flush did with the buffered records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flushed {
    Empty,
    Written(usize),
    Dropped(usize),
}

struct Batcher<S> {
    sink: S,
    limits: BatchLimits,
    pending: Vec<MeasurementRecord>,
}

impl<S: BatchSink> Batcher<S> {
    fn new(sink: S, limits: BatchLimits) -> Self {
        Self {
            sink,
            limits,
            pending: Vec::with_capacity(limits.max_records),
        }
    }

    /// Buffers one record, flushing once the batch is full
    async fn push(&mut self, record: MeasurementRecord) -> Flushed {
        self.pending.push(record);
        BATCH_SIZE.set(self.pending.len() as f64);
        if self.pending.len() >= self.limits.max_records {
            self.flush().await
        } else {
            Flushed::Empty
        }
    }

    async fn flush(&mut self) -> Flushed {
        if self.pending.is_empty() {
            return Flushed::Empty;
        }

        let count = self.pending.len();
        let start = Instant::now();
        let outcome = match self.sink.write(&self.pending).await {
            Ok(()) => {
                let elapsed = start.elapsed().as_secs_f64();
                INGEST_LATENCY_SECONDS.observe(elapsed);
                debug!("Wrote {} measurements in {:.3}s", count, elapsed);
                Flushed::Written(count)
            }
            Err(e) => {
                // sink already retried
                RECORDS_DROPPED_TOTAL.inc_by(count as f64);
                error!("Dropping {} measurements after failed write: {}", count, e);
                Flushed::Dropped(count)
            }
        };

        self.pending.clear();
        BATCH_SIZE.set(0.0);
        outcome
    }
}

/// Drains `rx` into the sink in batches of at most `limits.max_records`,
/// flushing at least every `limits.max_wait` while records are pending.
pub async fn run_batcher<S: BatchSink>(
    mut rx: mpsc::Receiver<MeasurementRecord>,
    sink: S,
    limits: BatchLimits,
) {
    info!(
        "Starting batcher: up to {} records, flushing every {:?}",
        limits.max_records, limits.max_wait
    );

    let mut batcher = Batcher::new(sink, limits);
    let mut ticker = interval_at(Instant::now() + limits.max_wait, limits.max_wait);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => {
                    batcher.push(record).await;
                }
                None => {
                    info!("Measurement channel closed, flushing remaining records");
                    batcher.flush().await;
                    break;
                }
            },
            _ = ticker.tick() => {
                batcher.flush().await;
            }
        }
    }

    info!("Batcher stopped");
}
