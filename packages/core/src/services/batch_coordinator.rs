//! Batch Coordinator
//!
//! Drives a stream of source rows through the merge pipeline:
//!
//! ```text
//! Normalize -> ResolveLabels -> MergeLeftNode -> MergeRightNode -> MergeEdge -> Committed
//! ```
//!
//! Any step can move the row to `Failed`, which is recorded in the
//! [`BatchReport`] against the row's source line; the batch keeps going.
//!
//! # Transactions
//!
//! The three merges of a row run in one store transaction, so a failure
//! after the left node was merged rolls that node back and no edge can
//! ever reference a missing endpoint. Validation happens before the
//! transaction is opened.
//!
//! # Concurrency
//!
//! Rows run on a pool of `max_concurrency` in-flight futures. Each row
//! attempt is bounded by `row_timeout`; a timed-out or connection-lost
//! attempt is retried with exponential backoff up to
//! `retry.max_attempts`. Dropping a timed-out attempt drops its
//! transaction, which rolls back and returns the connection. All rows are
//! polled from one task, so the store must wait for locks by awaiting
//! rather than blocking the thread.
//!
//! # Escalation
//!
//! `max_consecutive_connection_failures` rows in a row failing with
//! `ConnectionLost` abort the batch, as does the first failure when
//! `stop_on_error` is set. Cancelling through [`CancelSignal`] stops new
//! rows from starting while in-flight rows finish. Rows that never start
//! are counted as skipped.

use crate::config::{LoaderConfig, RetryPolicy};
use crate::db::{GraphStore, GraphTransaction, StorageError};
use crate::ingest::normalize;
use crate::models::{MergeOutcome, Properties, ResolvedRequest, SourceRow};
use crate::services::error::MergeError;
use crate::services::label_registry::LabelRegistry;
use crate::services::node_merge::{merge_node, NodeMerge};
use crate::services::relationship_merge::{merge_relationship, EdgeMerge};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Node attribute carrying the row's `concept`
pub const CONCEPT_ATTR: &str = "concept";

/// Edge match property carrying the row's `user_id`
pub const USER_ID_ATTR: &str = "user_id";

/// Cloneable cancellation handle for a running batch
#[derive(Debug, Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of self, so this cannot close early
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime knobs of a [`BatchCoordinator`]
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_concurrency: usize,
    pub row_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_consecutive_connection_failures: u32,
    pub stop_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&LoaderConfig::default())
    }
}

impl From<&LoaderConfig> for BatchOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            row_timeout: config.row_timeout(),
            retry: config.retry.clone(),
            max_consecutive_connection_failures: config.max_consecutive_connection_failures,
            stop_on_error: config.stop_on_error,
        }
    }
}

/// A failed row as reported to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    /// Source line of the row
    pub line: u64,
    /// Stable error code, e.g. `MissingRequiredType`
    pub kind: String,
    pub message: String,
    /// Transaction attempts made (0 when the row failed validation)
    pub attempts: u32,
}

/// Why a batch stopped before consuming every row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    ConnectionLost { consecutive: u32 },
    StopOnError { line: u64 },
    Cancelled,
}

/// Summary of one batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_succeeded: u64,
    pub rows_failed: u64,
    pub rows_skipped: u64,
    pub nodes_created: u64,
    pub nodes_reused: u64,
    pub attributes_filled: u64,
    pub edges_created: u64,
    pub edges_reused: u64,
    /// Extra transaction attempts across all rows
    pub retries: u64,
    /// Failed rows ordered by source line
    pub failures: Vec<RowFailure>,
    pub abort: Option<AbortReason>,
}

impl BatchReport {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            batch_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            rows_succeeded: 0,
            rows_failed: 0,
            rows_skipped: 0,
            nodes_created: 0,
            nodes_reused: 0,
            attributes_filled: 0,
            edges_created: 0,
            edges_reused: 0,
            retries: 0,
            failures: Vec::new(),
            abort: None,
        }
    }

    /// Rows taken from the source, including skipped ones
    pub fn rows_total(&self) -> u64 {
        self.rows_succeeded + self.rows_failed + self.rows_skipped
    }

    /// Every row succeeded and the batch ran to the end
    pub fn is_clean(&self) -> bool {
        self.rows_failed == 0 && self.rows_skipped == 0 && self.abort.is_none()
    }

    fn count_node(&mut self, merge: &NodeMerge) {
        match merge.outcome {
            MergeOutcome::Created => self.nodes_created += 1,
            MergeOutcome::Reused => self.nodes_reused += 1,
        }
        self.attributes_filled += merge.attributes_filled as u64;
    }

    fn count_edge(&mut self, merge: &EdgeMerge) {
        match merge.outcome {
            MergeOutcome::Created => self.edges_created += 1,
            MergeOutcome::Reused => self.edges_reused += 1,
        }
    }
}

/// The three merges committed for one row
#[derive(Debug, Clone, Copy)]
struct RowMerge {
    left: NodeMerge,
    right: NodeMerge,
    edge: EdgeMerge,
}

enum RowResult {
    Merged {
        merge: RowMerge,
        attempts: u32,
    },
    Failed {
        line: u64,
        error: MergeError,
        attempts: u32,
    },
    Skipped,
}

/// Runs batches of rows against one graph store
pub struct BatchCoordinator {
    store: Arc<dyn GraphStore>,
    registry: LabelRegistry,
    options: BatchOptions,
}

impl BatchCoordinator {
    pub fn new(store: Arc<dyn GraphStore>, registry: LabelRegistry, options: BatchOptions) -> Self {
        Self {
            store,
            registry,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Merge every row of `rows` and report the outcome
    ///
    /// Never fails as a whole: row failures and aborts are part of the
    /// report.
    pub async fn run<S>(&self, rows: S, cancel: &CancelSignal) -> BatchReport
    where
        S: Stream<Item = SourceRow>,
    {
        let mut report = BatchReport::start();
        tracing::info!(
            "Starting batch {} (concurrency {}, row timeout {:?})",
            report.batch_id,
            self.options.max_concurrency,
            self.options.row_timeout
        );

        let halted = AtomicBool::new(false);
        let mut consecutive_lost = 0u32;

        let results = rows
            .map(|row| self.process_row(row, &halted, cancel))
            .buffer_unordered(self.options.max_concurrency.max(1));
        futures::pin_mut!(results);

        while let Some(result) = results.next().await {
            match result {
                RowResult::Merged { merge, attempts } => {
                    consecutive_lost = 0;
                    report.rows_succeeded += 1;
                    report.retries += u64::from(attempts.saturating_sub(1));
                    report.count_node(&merge.left);
                    report.count_node(&merge.right);
                    report.count_edge(&merge.edge);
                }
                RowResult::Failed {
                    line,
                    error,
                    attempts,
                } => {
                    tracing::warn!("Row at line {} failed: {}: {}", line, error.kind(), error);
                    report.rows_failed += 1;
                    report.retries += u64::from(attempts.saturating_sub(1));

                    if error.is_connection_lost() {
                        consecutive_lost += 1;
                    } else {
                        consecutive_lost = 0;
                    }

                    report.failures.push(RowFailure {
                        line,
                        kind: error.kind().to_string(),
                        message: error.to_string(),
                        attempts,
                    });

                    if report.abort.is_none() {
                        if error.is_connection_lost()
                            && consecutive_lost >= self.options.max_consecutive_connection_failures
                        {
                            tracing::error!(
                                "Aborting batch {}: {} consecutive rows lost the store connection",
                                report.batch_id,
                                consecutive_lost
                            );
                            report.abort = Some(AbortReason::ConnectionLost {
                                consecutive: consecutive_lost,
                            });
                            halted.store(true, Ordering::SeqCst);
                        } else if self.options.stop_on_error {
                            tracing::error!(
                                "Aborting batch {}: row at line {} failed",
                                report.batch_id,
                                line
                            );
                            report.abort = Some(AbortReason::StopOnError { line });
                            halted.store(true, Ordering::SeqCst);
                        }
                    }
                }
                RowResult::Skipped => report.rows_skipped += 1,
            }
        }

        if report.abort.is_none() && cancel.is_cancelled() {
            report.abort = Some(AbortReason::Cancelled);
        }

        report.failures.sort_by_key(|failure| failure.line);
        report.finished_at = Utc::now();

        tracing::info!(
            "Finished batch {}: {} succeeded, {} failed, {} skipped ({} nodes created, {} edges created)",
            report.batch_id,
            report.rows_succeeded,
            report.rows_failed,
            report.rows_skipped,
            report.nodes_created,
            report.edges_created
        );

        report
    }

    async fn process_row(&self, row: SourceRow, halted: &AtomicBool, cancel: &CancelSignal) -> RowResult {
        if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
            return RowResult::Skipped;
        }

        let line = row.line;
        let resolved = match self.prepare(row) {
            Ok(resolved) => resolved,
            Err(error) => {
                return RowResult::Failed {
                    line,
                    error,
                    attempts: 0,
                }
            }
        };

        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.options.row_timeout, self.merge_once(&resolved)).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::timeout(format!(
                    "row transaction exceeded {:?}",
                    self.options.row_timeout
                ))),
            };

            match result {
                Ok(merge) => {
                    return RowResult::Merged {
                        merge,
                        attempts: attempt,
                    }
                }
                Err(e)
                    if e.is_retryable()
                        && attempt < self.options.retry.max_attempts
                        && !halted.load(Ordering::SeqCst)
                        && !cancel.is_cancelled() =>
                {
                    let delay = self.options.retry.backoff(attempt);
                    tracing::warn!(
                        "Row at line {} attempt {} failed ({}), retrying in {:?}",
                        line,
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return RowResult::Failed {
                        line,
                        error: e.into(),
                        attempts: attempt,
                    }
                }
            }
        }
    }

    /// Normalize and resolve labels; no store access
    fn prepare(&self, row: SourceRow) -> Result<ResolvedRequest, MergeError> {
        let raw = row.record.map_err(MergeError::MalformedRecord)?;
        let request = normalize(&raw)?;
        Ok(self.registry.resolve_request(&request)?)
    }

    async fn merge_once(&self, request: &ResolvedRequest) -> Result<RowMerge, StorageError> {
        let mut txn = self.store.begin().await?;

        match merge_row(txn.as_mut(), request).await {
            Ok(merge) => {
                txn.commit().await?;
                Ok(merge)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!("Rollback after failed row merge failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

/// Left node, right node, then the edge between them
async fn merge_row(
    txn: &mut dyn GraphTransaction,
    request: &ResolvedRequest,
) -> Result<RowMerge, StorageError> {
    let mut left_attrs = Properties::new();
    left_attrs.insert(CONCEPT_ATTR.to_string(), json!(request.left_concept));
    let left = merge_node(txn, &request.left_label, request.left_id, &left_attrs).await?;

    let right = merge_node(txn, &request.right_label, request.right_id, &Properties::new()).await?;

    let mut match_props = Properties::new();
    match_props.insert(USER_ID_ATTR.to_string(), json!(request.user_id));
    let edge = merge_relationship(txn, left.node, &request.relation_type, &match_props, right.node).await?;

    Ok(RowMerge { left, right, edge })
}
