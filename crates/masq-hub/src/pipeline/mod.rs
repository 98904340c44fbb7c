//! # Export pipeline
//!
//! The four-stage pipeline behind `GET /request/{id}`: a pool of readers
//! pulls disjoint `(LIMIT, OFFSET)` windows of the planned query, a pool of
//! transformers applies the per-column function vector, and a single
//! serializer CSV-encodes rows into the chunked response body. The
//! supervisor in [`run`] owns the stage boundaries.
//!
//! Worker pools are fixed-size and iterate a shared page list, so
//! concurrency does not grow with the dataset. Completion is tracked per
//! pool with a [`JoinSet`]; the supervisor drops its retained channel sender
//! once a pool has drained, which is what closes the stage boundary for the
//! consumers downstream. A reader error aborts the whole pipeline; rows
//! already serialized have been sent, so the client sees a truncated body.
//!
//! Ordering: rows keep cursor order within one worker, but the pools
//! interleave arbitrarily. Callers that need a total order must ask for it
//! in their conditions and run with single-worker pools.

use crate::error::ExportError;
use crate::source::RowSource;
use bytes::Bytes;
use masq_core::csv;
use masq_core::rules::RuleSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

/// Body chunks flowing to the HTTP response.
pub type BodySender = mpsc::Sender<Result<Bytes, io::Error>>;

/// Knobs for one pipeline run, loaded from the service config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Maximum rows per paged sub-query.
    pub block_size: u64,
    pub readers: usize,
    pub transformers: usize,
    pub raw_capacity: usize,
    pub processed_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            block_size: 100_000,
            readers: 4,
            transformers: 4,
            raw_capacity: 65_536,
            processed_capacity: 65_536,
        }
    }
}

/// Drive one export to completion. Returns the number of rows serialized.
pub async fn run(
    source: Arc<dyn RowSource>,
    columns: Vec<String>,
    total_rows: u64,
    rules: RuleSet,
    settings: &PipelineSettings,
    body: BodySender,
) -> Result<u64, ExportError> {
    let block_size = settings.block_size.max(1);
    let page_count = total_rows.div_ceil(block_size);
    let pages: Arc<Vec<(i64, i64)>> = Arc::new(
        (0..page_count)
            .map(|page| (block_size as i64, (page * block_size) as i64))
            .collect(),
    );
    let page_cursor = Arc::new(AtomicUsize::new(0));

    let (raw_tx, raw_rx) = mpsc::channel::<masq_core::Row>(settings.raw_capacity);
    let (processed_tx, mut processed_rx) =
        mpsc::channel::<masq_core::Row>(settings.processed_capacity);
    let raw_rx = Arc::new(Mutex::new(raw_rx));
    let rules = Arc::new(rules);

    // Readers: claim pages until the list runs dry.
    let reader_count = settings.readers.max(1).min(page_count.max(1) as usize);
    let mut readers: JoinSet<Result<u64, ExportError>> = JoinSet::new();
    for worker in 0..reader_count {
        let source = source.clone();
        let pages = pages.clone();
        let cursor = page_cursor.clone();
        let tx = raw_tx.clone();
        readers.spawn(async move {
            let mut rows_read = 0u64;
            loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(&(limit, offset)) = pages.get(index) else {
                    break;
                };
                let page = source.fetch_page(limit, offset).await?;
                for row in page {
                    if tx.send(row).await.is_err() {
                        return Err(ExportError::SerializerWrite);
                    }
                    rows_read += 1;
                }
            }
            tracing::debug!(worker, rows = rows_read, "reader finished");
            Ok(rows_read)
        });
    }

    // Transformers: shared receiver, per-row function vector application.
    let mut transformers: JoinSet<Result<u64, ExportError>> = JoinSet::new();
    for worker in 0..settings.transformers.max(1) {
        let rx = raw_rx.clone();
        let tx = processed_tx.clone();
        let rules = rules.clone();
        transformers.spawn(async move {
            let mut rows_transformed = 0u64;
            loop {
                let row = { rx.lock().await.recv().await };
                let Some(row) = row else {
                    break;
                };
                if tx.send(rules.apply(&row)).await.is_err() {
                    return Err(ExportError::SerializerWrite);
                }
                rows_transformed += 1;
            }
            tracing::debug!(worker, rows = rows_transformed, "transformer finished");
            Ok(rows_transformed)
        });
    }

    // Serializer: header first, then one record per processed row.
    let serializer_body = body.clone();
    let serializer = tokio::spawn(async move {
        let header = csv::encode_record(&columns);
        serializer_body
            .send(Ok(Bytes::from(header)))
            .await
            .map_err(|_| ExportError::SerializerWrite)?;
        let mut rows_written = 0u64;
        while let Some(row) = processed_rx.recv().await {
            let record = csv::encode_record(&row);
            serializer_body
                .send(Ok(Bytes::from(record)))
                .await
                .map_err(|_| ExportError::SerializerWrite)?;
            rows_written += 1;
        }
        tracing::debug!(rows = rows_written, "serializer finished");
        Ok::<u64, ExportError>(rows_written)
    });

    // Supervision: reader barrier, then transformer barrier, then the
    // serializer's completion. The retained senders dropped here are what
    // close each stage.
    while let Some(joined) = readers.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                transformers.abort_all();
                serializer.abort();
                return Err(abort_stream(&body, err).await);
            }
            Err(join_err) => {
                transformers.abort_all();
                serializer.abort();
                return Err(abort_stream(&body, ExportError::Query(join_err.to_string())).await);
            }
        }
    }
    drop(raw_tx);

    while let Some(joined) = transformers.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                serializer.abort();
                return Err(abort_stream(&body, err).await);
            }
            Err(join_err) => {
                serializer.abort();
                return Err(abort_stream(&body, ExportError::Query(join_err.to_string())).await);
            }
        }
    }
    drop(processed_tx);

    match serializer.await {
        Ok(result) => result,
        Err(join_err) => Err(ExportError::Query(join_err.to_string())),
    }
}

/// Terminate the body stream with the failure so the client sees an aborted
/// transfer rather than a clean end of file.
async fn abort_stream(body: &BodySender, err: ExportError) -> ExportError {
    let _ = body.send(Err(io::Error::other(err.to_string()))).await;
    err
}
