//! Fault Handling Tests
//!
//! Drives the batch coordinator against a libsql store wrapped in a
//! fault-injecting [`GraphStore`] to cover the failure paths that a
//! healthy embedded database never produces on its own:
//!
//! - transient `Timeout` / `ConnectionLost` errors retried with backoff
//! - row transactions overrunning their deadline
//! - the write lock held elsewhere, and transactions yielding mid-flight
//! - escalation after consecutive `ConnectionLost` rows
//! - losing a create race (`ConstraintViolation` then re-fetch)
//! - stop-on-error and cancellation

#[cfg(test)]
mod fault_handling_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use provgraph_core::{
        AbortReason, BatchCoordinator, BatchOptions, BatchReport, CancelSignal, EdgeRecord,
        GraphDatabase, GraphStats, GraphStore, GraphTransaction, Label, LabelRegistry,
        LabelSyntax, LibsqlGraphStore, NodeRecord, NodeRef, Properties, RawRow, RelationType,
        RetryPolicy, SourceRow, StorageError,
    };
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// Failures to inject, shared by the store and its transactions
    #[derive(Default)]
    struct Faults {
        /// Outcome of each `begin()` call in order; `None` passes through
        begin_script: Mutex<VecDeque<Option<StorageError>>>,
        /// Transactions whose first lookup hangs
        stalls: AtomicUsize,
        /// Every create reports a constraint violation after succeeding
        lose_create_races: AtomicBool,
        /// Lookups hand control back to the executor before running
        yield_in_lookups: AtomicBool,
    }

    impl Faults {
        fn script_begins(&self, outcomes: impl IntoIterator<Item = Option<StorageError>>) {
            self.begin_script.lock().unwrap().extend(outcomes);
        }

        fn take_stall(&self) -> bool {
            self.stalls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    struct FaultyStore {
        inner: Arc<dyn GraphStore>,
        faults: Arc<Faults>,
        begins: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for FaultyStore {
        async fn begin(&self) -> Result<Box<dyn GraphTransaction>, StorageError> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            let scripted = self.faults.begin_script.lock().unwrap().pop_front().flatten();
            if let Some(err) = scripted {
                return Err(err);
            }
            Ok(Box::new(FaultyTransaction {
                inner: self.inner.begin().await?,
                faults: self.faults.clone(),
            }))
        }

        fn label_syntax(&self) -> LabelSyntax {
            self.inner.label_syntax()
        }

        async fn stats(&self) -> Result<GraphStats, StorageError> {
            self.inner.stats().await
        }

        async fn close(&self) -> Result<(), StorageError> {
            self.inner.close().await
        }
    }

    struct FaultyTransaction {
        inner: Box<dyn GraphTransaction>,
        faults: Arc<Faults>,
    }

    #[async_trait]
    impl GraphTransaction for FaultyTransaction {
        async fn find_node(
            &mut self,
            label: &Label,
            id: i64,
        ) -> Result<Option<NodeRecord>, StorageError> {
            if self.faults.take_stall() {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.faults.yield_in_lookups.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
            self.inner.find_node(label, id).await
        }

        async fn create_node(
            &mut self,
            label: &Label,
            id: i64,
            properties: &Properties,
        ) -> Result<NodeRecord, StorageError> {
            let created = self.inner.create_node(label, id, properties).await?;
            if self.faults.lose_create_races.load(Ordering::SeqCst) {
                return Err(StorageError::constraint_violation("UNIQUE constraint failed"));
            }
            Ok(created)
        }

        async fn set_attr_if_absent(
            &mut self,
            node: NodeRef,
            key: &str,
            value: &Value,
        ) -> Result<bool, StorageError> {
            self.inner.set_attr_if_absent(node, key, value).await
        }

        async fn find_edge(
            &mut self,
            rel_type: &RelationType,
            from: NodeRef,
            to: NodeRef,
            properties: &Properties,
        ) -> Result<Option<EdgeRecord>, StorageError> {
            self.inner.find_edge(rel_type, from, to, properties).await
        }

        async fn create_edge(
            &mut self,
            rel_type: &RelationType,
            from: NodeRef,
            to: NodeRef,
            properties: &Properties,
        ) -> Result<EdgeRecord, StorageError> {
            let created = self.inner.create_edge(rel_type, from, to, properties).await?;
            if self.faults.lose_create_races.load(Ordering::SeqCst) {
                return Err(StorageError::constraint_violation("UNIQUE constraint failed"));
            }
            Ok(created)
        }

        async fn commit(self: Box<Self>) -> Result<(), StorageError> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
            self.inner.rollback().await
        }
    }

    struct TestEnv {
        store: Arc<FaultyStore>,
        faults: Arc<Faults>,
        _temp_dir: TempDir,
    }

    async fn create_test_env() -> Result<TestEnv> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(GraphDatabase::new(temp_dir.path().join("graph.db")).await?);
        let faults = Arc::new(Faults::default());
        let store = Arc::new(FaultyStore {
            inner: Arc::new(LibsqlGraphStore::new(db, 4)),
            faults: faults.clone(),
            begins: AtomicUsize::new(0),
        });
        Ok(TestEnv {
            store,
            faults,
            _temp_dir: temp_dir,
        })
    }

    fn options() -> BatchOptions {
        BatchOptions {
            max_concurrency: 1,
            row_timeout: Duration::from_millis(500),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                multiplier: 2.0,
            },
            max_consecutive_connection_failures: 3,
            stop_on_error: false,
        }
    }

    fn rows(count: usize) -> Vec<SourceRow> {
        (0..count)
            .map(|i| {
                let left = (i + 1).to_string();
                SourceRow::new(
                    i as u64 + 2,
                    RawRow::new(&left, "Paper", "", "1000", "Dataset", "CITES", "1"),
                )
            })
            .collect()
    }

    async fn load(env: &TestEnv, options: BatchOptions, rows: Vec<SourceRow>) -> BatchReport {
        let coordinator = BatchCoordinator::new(env.store.clone(), LabelRegistry::default(), options);
        coordinator
            .run(stream::iter(rows), &CancelSignal::new())
            .await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transient_errors_are_retried() -> Result<()> {
        let env = create_test_env().await?;
        env.faults.script_begins([
            Some(StorageError::timeout("database is locked")),
            Some(StorageError::connection_lost("socket closed")),
        ]);

        let report = load(&env, options(), rows(1)).await;

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(report.retries, 2);
        assert_eq!(env.store.begins.load(Ordering::SeqCst), 3);
        assert_eq!(env.store.stats().await?.nodes, 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retries_are_bounded() -> Result<()> {
        let env = create_test_env().await?;
        env.faults
            .script_begins((0..3).map(|_| Some(StorageError::timeout("database is locked"))));

        let report = load(&env, options(), rows(1)).await;

        assert_eq!(report.rows_failed, 1);
        assert_eq!(report.failures[0].kind, "Timeout");
        assert_eq!(report.failures[0].attempts, 3);
        assert_eq!(report.retries, 2);
        assert!(report.abort.is_none());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_constraint_violation_is_not_retried_at_row_level() -> Result<()> {
        let env = create_test_env().await?;
        env.faults
            .script_begins([Some(StorageError::constraint_violation("FOREIGN KEY constraint failed"))]);

        let report = load(&env, options(), rows(1)).await;

        assert_eq!(report.failures[0].kind, "ConstraintViolation");
        assert_eq!(report.failures[0].attempts, 1);
        assert_eq!(env.store.begins.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_transaction_times_out_and_is_rolled_back() -> Result<()> {
        let env = create_test_env().await?;
        env.faults.stalls.store(1, Ordering::SeqCst);

        let mut options = options();
        options.row_timeout = Duration::from_millis(200);
        let report = load(&env, options, rows(2)).await;

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(report.retries, 1);
        // The abandoned attempt left nothing behind
        let stats = env.store.stats().await?;
        assert_eq!((stats.nodes, stats.edges), (3, 2));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_consecutive_connection_loss_aborts_batch() -> Result<()> {
        let env = create_test_env().await?;
        env.faults
            .script_begins((0..100).map(|_| Some(StorageError::connection_lost("connection refused"))));

        let mut options = options();
        options.retry = RetryPolicy::none();
        let report = load(&env, options, rows(10)).await;

        assert_eq!(report.rows_failed, 3);
        assert_eq!(report.rows_skipped, 7);
        assert_eq!(report.rows_succeeded, 0);
        assert_eq!(
            report.abort,
            Some(AbortReason::ConnectionLost { consecutive: 3 })
        );
        assert!(report.failures.iter().all(|f| f.kind == "ConnectionLost"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_success_resets_connection_loss_count() -> Result<()> {
        let env = create_test_env().await?;
        let lost = || Some(StorageError::connection_lost("connection reset"));
        env.faults
            .script_begins([lost(), lost(), None, lost(), lost()]);

        let mut options = options();
        options.retry = RetryPolicy::none();
        let report = load(&env, options, rows(5)).await;

        assert_eq!(report.rows_failed, 4);
        assert_eq!(report.rows_succeeded, 1);
        assert!(report.abort.is_none());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lost_create_race_reuses_winner() -> Result<()> {
        let env = create_test_env().await?;
        env.faults.lose_create_races.store(true, Ordering::SeqCst);

        let report = load(&env, options(), rows(1)).await;

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(report.nodes_created, 0);
        assert_eq!(report.nodes_reused, 2);
        assert_eq!(report.edges_reused, 1);
        assert_eq!(report.retries, 0);

        let stats = env.store.stats().await?;
        assert_eq!((stats.nodes, stats.edges), (2, 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_on_error() -> Result<()> {
        let env = create_test_env().await?;

        let mut source = vec![SourceRow::new(
            2,
            RawRow::new("1", "Paper", "", "2", "", "CITES", "1"),
        )];
        source.extend(rows(3).into_iter().map(|mut row| {
            row.line += 1;
            row
        }));

        let mut options = options();
        options.stop_on_error = true;
        let report = load(&env, options, source).await;

        assert_eq!(report.rows_failed, 1);
        assert_eq!(report.rows_skipped, 3);
        assert_eq!(report.abort, Some(AbortReason::StopOnError { line: 2 }));
        assert_eq!(env.store.stats().await?.nodes, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everything() -> Result<()> {
        let env = create_test_env().await?;
        let coordinator = BatchCoordinator::new(env.store.clone(), LabelRegistry::default(), options());

        let cancel = CancelSignal::new();
        cancel.cancel();
        let report = coordinator.run(stream::iter(rows(4)), &cancel).await;

        assert_eq!(report.rows_skipped, 4);
        assert_eq!(report.abort, Some(AbortReason::Cancelled));
        assert_eq!(env.store.begins.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_stops_new_rows() -> Result<()> {
        let env = create_test_env().await?;
        let coordinator = BatchCoordinator::new(env.store.clone(), LabelRegistry::default(), options());

        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        let source = stream::iter(rows(5)).inspect(move |row| {
            if row.line == 4 {
                trigger.cancel();
            }
        });
        let report = coordinator.run(source, &cancel).await;

        assert_eq!(report.rows_succeeded, 2);
        assert_eq!(report.rows_skipped, 3);
        assert_eq!(report.abort, Some(AbortReason::Cancelled));
        assert_eq!(env.store.stats().await?.edges, 2);

        // The signal stays raised for anyone waiting on it
        tokio::time::timeout(Duration::from_secs(1), cancel.cancelled()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_yielding_transactions_do_not_stall_each_other() -> Result<()> {
        let env = create_test_env().await?;
        env.faults.yield_in_lookups.store(true, Ordering::SeqCst);

        let mut options = options();
        options.max_concurrency = 4;
        options.retry = RetryPolicy::none();
        let started = Instant::now();
        let report = load(&env, options, rows(8)).await;

        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(report.rows_succeeded, 8);
        assert!(started.elapsed() < Duration::from_secs(2));
        let stats = env.store.stats().await?;
        assert_eq!((stats.nodes, stats.edges), (9, 8));
        Ok(())
    }

    #[tokio::test]
    async fn test_locked_store_fails_row_within_row_timeout() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(
            GraphDatabase::with_busy_timeout(
                temp_dir.path().join("graph.db"),
                Duration::from_secs(2),
            )
            .await?,
        );
        let store: Arc<dyn GraphStore> = Arc::new(LibsqlGraphStore::new(db.clone(), 4));

        // Another writer holds the SQLite lock for the whole row attempt
        let holder = db.connect_with_timeout().await?;
        holder.execute("BEGIN IMMEDIATE", ()).await?;

        let mut options = options();
        options.row_timeout = Duration::from_millis(100);
        options.retry = RetryPolicy::none();
        let coordinator = BatchCoordinator::new(store.clone(), LabelRegistry::default(), options);

        let started = Instant::now();
        let report = coordinator
            .run(stream::iter(rows(1)), &CancelSignal::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.rows_failed, 1);
        assert_eq!(report.failures[0].kind, "Timeout");
        assert_eq!(report.failures[0].attempts, 1);

        holder.execute("ROLLBACK", ()).await?;
        let report = coordinator
            .run(stream::iter(rows(1)), &CancelSignal::new())
            .await;
        assert!(report.is_clean(), "failures: {:?}", report.failures);
        Ok(())
    }
}
