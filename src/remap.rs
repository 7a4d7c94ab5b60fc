//! The remap workflow: create, configure, copy, poll, verify, finalize, swap.
//!
//! [`Remapper::run`] drives one [`RemapRequest`] through the stages below and
//! returns a [`RemapOutcome`]. A failing stage stops the run; nothing after it
//! is attempted, and the failure names the stage so the caller knows exactly
//! how far the run got.
//!
//! ```text
//!  precondition ─▶ exists? ─▶ create ─▶ configure ─▶ copy-submit
//!                                                        │
//!   alias-swap ◀─ finalize-settings ◀─ verify ◀─ copy-poll ◀┘
//! ```
//!
//! The target is never deleted after it was created by this run, even on
//! failure; cleanup is the operator's call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::sync::{watch, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{error, info, warn, Instrument};

use crate::alias;
use crate::config::{Config, IndexSettingsConfig, RemapConfig};
use crate::error::{ErrorKind, StoreError};
use crate::models::{BulkCopySpec, RemapOutcome, RemapRequest, Stage, StageFailure, TaskId};
use crate::progress::{CopyProgress, ProgressMode, ProgressReporter};
use crate::schema::{self, default_target_name};
use crate::store::elastic::ElasticStore;
use crate::store::{Store, NUMBER_OF_REPLICAS, REFRESH_INTERVAL};

/// Poll loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub poll_interval: Duration,
    /// Give up waiting for the copy task after this long. `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_wait: None,
        }
    }
}

impl RunOptions {
    pub fn from_config(cfg: &RemapConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            max_wait: cfg.max_wait_secs.map(Duration::from_secs),
        }
    }
}

/// Cancellation hook for a running remap.
///
/// Cancelling stops the poll loop at once; the run returns a `copy-poll`
/// failure and leaves the target as it is. The store-side copy task is not
/// cancelled.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-target async locks for callers that may start concurrent runs.
#[derive(Debug, Default)]
pub struct TargetLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `target`.
    pub async fn acquire(&self, target: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Holders and waiters keep a clone; a count of 1 means unused.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(target.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of targets currently held or waited on.
    pub fn tracked(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }
}

/// Runs remap requests against one store.
pub struct Remapper<'a> {
    store: &'a dyn Store,
    settings: IndexSettingsConfig,
    options: RunOptions,
    cancel: CancelHandle,
}

impl<'a> Remapper<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            settings: IndexSettingsConfig::default(),
            options: RunOptions::default(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_settings(mut self, settings: IndexSettingsConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run `request`, reporting copy progress to `progress`.
    pub async fn run(&self, request: &RemapRequest, progress: &dyn ProgressReporter) -> RemapOutcome {
        let span = tracing::info_span!(
            "remap",
            source = %request.source,
            target = %request.target
        );
        async {
            match self.execute(request, progress).await {
                Ok(records_copied) => {
                    info!(records_copied, "remap complete");
                    RemapOutcome::Success { records_copied }
                }
                Err(failure) => {
                    error!(
                        stage = %failure.stage,
                        kind = %failure.kind,
                        reason = %failure.reason,
                        target_may_exist = failure.target_may_exist,
                        "remap failed"
                    );
                    RemapOutcome::Failed(failure)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Like [`run`](Self::run), holding the lock for `request.target` throughout.
    pub async fn run_locked(
        &self,
        locks: &TargetLocks,
        request: &RemapRequest,
        progress: &dyn ProgressReporter,
    ) -> RemapOutcome {
        let _guard = locks.acquire(request.target.as_str()).await;
        self.run(request, progress).await
    }

    async fn execute(
        &self,
        req: &RemapRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<u64, StageFailure> {
        let store = self.store;
        let target = req.target.as_str();

        check_preconditions(req).map_err(|reason| StageFailure {
            stage: Stage::Precondition,
            kind: ErrorKind::Precondition,
            reason,
            target_may_exist: false,
            records_copied: None,
        })?;

        self.ensure_not_cancelled(Stage::Create, false)?;

        let source_exists = store
            .collection_exists(req.source.as_str())
            .await
            .map_err(|e| store_failure(Stage::Create, &e, "checking whether source exists", false))?;
        if !source_exists {
            return Err(StageFailure {
                stage: Stage::Create,
                kind: ErrorKind::Precondition,
                reason: format!("source does not exist: {}", req.source),
                target_may_exist: false,
                records_copied: None,
            });
        }

        let exists = store
            .collection_exists(target)
            .await
            .map_err(|e| store_failure(Stage::Create, &e, "checking whether target exists", false))?;
        if exists {
            if !req.replace_if_exists {
                return Err(StageFailure {
                    stage: Stage::Create,
                    kind: ErrorKind::AlreadyExists,
                    reason: format!("target exists: {}", target),
                    target_may_exist: true,
                    records_copied: None,
                });
            }
            self.ensure_not_cancelled(Stage::Create, true)?;
            info!(stage = "create", "deleting existing target");
            store
                .delete_collection(target)
                .await
                .map_err(|e| store_failure(Stage::Create, &e, "deleting existing target", true))?;
        }

        self.ensure_not_cancelled(Stage::Create, false)?;
        info!(stage = "create", "creating target");
        store
            .create_collection(target, &req.target_schema)
            .await
            .map_err(|e| {
                store_failure(Stage::Create, &e, "creating target", e.may_have_applied())
            })?;

        self.ensure_not_cancelled(Stage::Configure, true)?;
        info!(
            stage = "configure",
            refresh_interval = %self.settings.bulk_refresh_interval,
            replicas = self.settings.bulk_replicas,
            "tuning target for bulk copy"
        );
        store
            .put_setting(target, REFRESH_INTERVAL, &json!(self.settings.bulk_refresh_interval))
            .await
            .map_err(|e| store_failure(Stage::Configure, &e, "setting refresh interval", true))?;
        store
            .put_setting(target, NUMBER_OF_REPLICAS, &json!(self.settings.bulk_replicas))
            .await
            .map_err(|e| store_failure(Stage::Configure, &e, "setting number of replicas", true))?;

        let spec = BulkCopySpec {
            source: req.source.clone(),
            dest: req.target.clone(),
            batch_size: req.batch_size,
            slices: req.parallelism,
            max_records: req.record_limit(),
            pipeline: req.pipeline().map(str::to_string),
        };
        self.ensure_not_cancelled(Stage::CopySubmit, true)?;
        let task_id = store
            .submit_bulk_copy(&spec)
            .await
            .map_err(|e| store_failure(Stage::CopySubmit, &e, "submitting reindex", true))?;
        info!(stage = "copy-submit", task = %task_id, "reindex task started");

        let (processed, total) = self.await_copy(&task_id, progress).await?;

        if processed != total {
            return Err(StageFailure {
                stage: Stage::CopyPoll,
                kind: ErrorKind::PartialCopy,
                reason: format!("partial copy: {}/{} records copied", processed, total),
                target_may_exist: true,
                records_copied: None,
            });
        }
        info!(stage = "copy-poll", processed, total, "reindex finished");

        info!(
            stage = "finalize-settings",
            refresh_interval = %self.settings.refresh_interval,
            replicas = self.settings.replicas,
            "restoring target settings"
        );
        let finalize = |what: &str, e: StoreError| StageFailure {
            stage: Stage::FinalizeSettings,
            kind: ErrorKind::FinalizeFailed,
            reason: format!(
                "records were copied successfully ({}), but {} failed: {}",
                processed, what, e
            ),
            target_may_exist: true,
            records_copied: Some(processed),
        };
        store
            .put_setting(target, REFRESH_INTERVAL, &json!(self.settings.refresh_interval))
            .await
            .map_err(|e| finalize("restoring refresh interval", e))?;
        store
            .put_setting(target, NUMBER_OF_REPLICAS, &json!(self.settings.replicas))
            .await
            .map_err(|e| finalize("restoring number of replicas", e))?;

        if req.wants_alias_update() {
            info!(stage = "alias-swap", "updating aliases");
            alias::move_alias(
                store,
                &req.source,
                &req.target,
                req.alias_to_move(),
                req.new_alias(),
            )
            .await
            .map_err(|e| StageFailure {
                stage: Stage::AliasSwap,
                kind: ErrorKind::AliasSwapFailed,
                reason: format!(
                    "records were copied successfully ({}), but the alias update failed: {}",
                    processed, e
                ),
                target_may_exist: true,
                records_copied: Some(processed),
            })?;
        }

        Ok(processed)
    }

    /// Stop before `stage` if cancellation was requested.
    fn ensure_not_cancelled(&self, stage: Stage, target_may_exist: bool) -> Result<(), StageFailure> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        warn!(stage = %stage, "cancelled before stage started");
        Err(StageFailure {
            stage,
            kind: ErrorKind::Cancelled,
            reason: format!("cancelled before {}", stage),
            target_may_exist,
            records_copied: None,
        })
    }

    /// Poll the copy task until it is done. Returns the final (processed, total).
    async fn await_copy(
        &self,
        task_id: &TaskId,
        progress: &dyn ProgressReporter,
    ) -> Result<(u64, u64), StageFailure> {
        let started = Instant::now();
        let mut reported = 0u64;

        let poll_failure = |kind: ErrorKind, reason: String| StageFailure {
            stage: Stage::CopyPoll,
            kind,
            reason,
            target_may_exist: true,
            records_copied: None,
        };

        loop {
            if self.cancel.is_cancelled() {
                warn!(stage = "copy-poll", task = %task_id, "poll loop cancelled");
                return Err(poll_failure(ErrorKind::Cancelled, "cancelled".to_string()));
            }

            let task = self
                .store
                .get_task_status(task_id)
                .await
                .map_err(|e| store_failure(Stage::CopyPoll, &e, "fetching task status", true))?;

            if let Some(err) = task.error {
                return Err(poll_failure(ErrorKind::TaskError, err));
            }

            // Keep what we report non-decreasing even if the store regresses.
            reported = reported.max(task.processed);
            if task.total > 0 {
                progress.report(CopyProgress {
                    processed: reported,
                    total: task.total,
                });
            }

            if task.done {
                return Ok((task.processed, task.total));
            }

            let mut wait = self.options.poll_interval;
            if let Some(max_wait) = self.options.max_wait {
                let elapsed = started.elapsed();
                if elapsed >= max_wait {
                    return Err(poll_failure(
                        ErrorKind::TimedOut,
                        format!(
                            "gave up after {}s waiting for task {} ({}/{} records copied)",
                            max_wait.as_secs(),
                            task_id,
                            task.processed,
                            task.total
                        ),
                    ));
                }
                wait = wait.min(max_wait - elapsed);
            }

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }
}

fn check_preconditions(req: &RemapRequest) -> Result<(), String> {
    if req.source.is_empty() {
        return Err("source collection must not be empty".to_string());
    }
    if req.target.is_empty() {
        return Err("target collection must not be empty".to_string());
    }
    if req.source == req.target {
        return Err(format!(
            "target must differ from source ({})",
            req.source
        ));
    }
    if !req.target_schema.is_usable() {
        return Err("target schema must be a non-empty JSON object".to_string());
    }
    if req.batch_size == 0 {
        return Err("batch size must be > 0".to_string());
    }
    if req.parallelism == 0 {
        return Err("parallelism must be > 0".to_string());
    }
    if req.max_records == Some(0) {
        return Err("max records of 0 would copy nothing; omit it or use -1 for no limit".to_string());
    }
    Ok(())
}

fn store_failure(stage: Stage, e: &StoreError, what: &str, target_may_exist: bool) -> StageFailure {
    StageFailure {
        stage,
        kind: e.kind(),
        reason: format!("{}: {}", what, e),
        target_may_exist,
        records_copied: None,
    }
}

/// Arguments of `remap run`, after CLI parsing.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub source: String,
    pub target: Option<String>,
    pub mapping: PathBuf,
    pub replace: Option<bool>,
    pub pipeline: Option<String>,
    pub batch_size: Option<u32>,
    pub slices: Option<u32>,
    pub max_docs: Option<i64>,
    pub move_alias: Option<String>,
    pub new_alias: Option<String>,
    pub progress: Option<ProgressMode>,
}

/// Build a request from CLI arguments, filling gaps from config.
pub fn build_request(config: &Config, args: &RunArgs) -> Result<RemapRequest> {
    let target_schema = schema::read_schema_file(&args.mapping)?;
    let target = args
        .target
        .clone()
        .unwrap_or_else(|| default_target_name(&args.source, &config.remap.target_suffix));

    Ok(RemapRequest {
        source: args.source.as_str().into(),
        target: target.into(),
        target_schema,
        replace_if_exists: args.replace.unwrap_or(config.remap.replace_index),
        transform_pipeline: args.pipeline.clone(),
        batch_size: args.batch_size.unwrap_or(config.remap.batch_size),
        parallelism: args.slices.unwrap_or(config.remap.slices),
        max_records: args.max_docs,
        alias_to_move: args.move_alias.clone(),
        new_alias: args.new_alias.clone(),
    })
}

/// CLI entry point for `remap run`.
pub async fn run_remap(config: &Config, args: RunArgs) -> Result<()> {
    let request = build_request(config, &args)?;
    let store = ElasticStore::from_config(&config.connection)
        .context("Failed to set up Elasticsearch client")?;

    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping poll loop");
                cancel.cancel();
            }
        });
    }

    let remapper = Remapper::new(&store)
        .with_settings(config.settings.clone())
        .with_options(RunOptions::from_config(&config.remap))
        .with_cancel(cancel);

    let mode = args.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let reporter = mode.reporter(request.target.as_str());

    println!("Remapping {} to {}", request.source, request.target);
    let started_at = chrono::Utc::now();
    let outcome = remapper.run(&request, reporter.as_ref()).await;
    let finished_at = chrono::Utc::now();
    let elapsed = finished_at - started_at;

    match outcome {
        RemapOutcome::Success { records_copied } => {
            println!("Reindex successful, {} documents reindexed", records_copied);
            println!(
                "started {}  finished {}  ({}s)",
                started_at.to_rfc3339(),
                finished_at.to_rfc3339(),
                elapsed.num_seconds()
            );
            Ok(())
        }
        RemapOutcome::Failed(failure) => {
            eprintln!("stage:  {}", failure.stage);
            eprintln!("kind:   {}", failure.kind);
            eprintln!("reason: {}", failure.reason);
            if failure.target_may_exist {
                eprintln!(
                    "note:   {} may exist in a partial state; it was not deleted",
                    request.target
                );
            }
            if let Some(n) = failure.records_copied {
                eprintln!("copied: {} records", n);
            }
            eprintln!("next:   {}", failure.remediation());
            bail!("remap failed at stage {}", failure.stage)
        }
    }
}
