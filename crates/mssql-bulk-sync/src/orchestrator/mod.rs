//! Bulk sync orchestrator - the public entry points.
//!
//! Every staged operation walks the same linear sequence:
//!
//! `Start → ShapeResolved → StagingCreated → Loaded → Reconciled →
//! IdentityMapped → StagingDropped → Done`
//!
//! Any failure moves to `Failing`, which rolls back the wrapping transaction,
//! drops the staging table (unless permanent) and returns the original error.
//! Nothing is retried.

use std::fmt;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BulkSettings, Config};
use crate::core::identifier::{quote, validate_predicate, TableName};
use crate::core::options::{BulkOptions, SyncResult};
use crate::core::record::Record;
use crate::core::traits::SqlSession;
use crate::error::{BulkSyncError, Result};
use crate::identity;
use crate::introspect;
use crate::loader;
use crate::reconcile::{self, sql, Operation, ReconcilePlan, Reconciled};
use crate::staging::{self, StagingTable};

/// Position of a bulk call in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    ShapeResolved,
    StagingCreated,
    Loaded,
    Reconciled,
    IdentityMapped,
    StagingDropped,
    Done,
    Failing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::ShapeResolved => "shape resolved",
            Phase::StagingCreated => "staging created",
            Phase::Loaded => "loaded",
            Phase::Reconciled => "reconciled",
            Phase::IdentityMapped => "identity mapped",
            Phase::StagingDropped => "staging dropped",
            Phase::Done => "done",
            Phase::Failing => "failing",
        };
        f.write_str(name)
    }
}

struct Progress {
    operation: Operation,
    target: String,
    phase: Phase,
}

impl Progress {
    fn new(operation: Operation, target: &TableName) -> Self {
        debug!("Bulk {} on {}: {}", operation, target, Phase::Start);
        Self {
            operation,
            target: target.qualified(),
            phase: Phase::Start,
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(
            "Bulk {} on {}: {} -> {}",
            self.operation, self.target, self.phase, phase
        );
        self.phase = phase;
    }
}

/// Records of a call; only insert and merge need write access.
enum Input<'a, R> {
    Shared(&'a [R]),
    Exclusive(&'a mut [R]),
}

impl<R> Input<'_, R> {
    fn records(&self) -> &[R] {
        match self {
            Input::Shared(records) => records,
            Input::Exclusive(records) => records,
        }
    }
}

/// The bulk data synchronization engine.
///
/// Holds engine-wide defaults and the cancellation token; the connection is
/// passed to every call. All calls of one operation run on that session, one
/// after another.
#[derive(Debug, Clone)]
pub struct BulkSync {
    settings: BulkSettings,
    default_schema: String,
    cancel: CancellationToken,
}

impl Default for BulkSync {
    fn default() -> Self {
        Self::new(BulkSettings::default())
    }
}

impl BulkSync {
    pub fn new(settings: BulkSettings) -> Self {
        Self {
            settings,
            default_schema: "dbo".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// Engine with the configured defaults and default schema.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.bulk.clone()).with_default_schema(config.target.schema.clone())
    }

    /// Schema used for unqualified table names.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    /// Cancel calls through `token`. A cancelled call rolls back and
    /// cleans up, then fails with [`BulkSyncError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &BulkSettings {
        &self.settings
    }

    /// Insert `records` into `table`.
    ///
    /// Generated identities are written back into the records unless
    /// `keep_identity` is set or `auto_map_output_identity` is off.
    pub async fn bulk_insert<S, R>(
        &self,
        session: &mut S,
        table: &str,
        records: &mut [R],
        options: BulkOptions,
    ) -> Result<SyncResult>
    where
        S: SqlSession + ?Sized,
        R: Record,
    {
        self.run(session, table, Operation::Insert, Input::Exclusive(records), options)
            .await
    }

    /// Update the target rows matching `records`.
    pub async fn bulk_update<S, R>(
        &self,
        session: &mut S,
        table: &str,
        records: &[R],
        options: BulkOptions,
    ) -> Result<SyncResult>
    where
        S: SqlSession + ?Sized,
        R: Record,
    {
        self.run(session, table, Operation::Update, Input::Shared(records), options)
            .await
    }

    /// Update matching rows and insert the rest in one statement.
    ///
    /// Identities of inserted rows are mapped back; updated records keep
    /// theirs.
    pub async fn bulk_merge<S, R>(
        &self,
        session: &mut S,
        table: &str,
        records: &mut [R],
        options: BulkOptions,
    ) -> Result<SyncResult>
    where
        S: SqlSession + ?Sized,
        R: Record,
    {
        self.run(session, table, Operation::Merge, Input::Exclusive(records), options)
            .await
    }

    /// Delete the target rows matching `records`.
    pub async fn bulk_delete<S, R>(
        &self,
        session: &mut S,
        table: &str,
        records: &[R],
        options: BulkOptions,
    ) -> Result<SyncResult>
    where
        S: SqlSession + ?Sized,
        R: Record,
    {
        self.run(session, table, Operation::Delete, Input::Shared(records), options)
            .await
    }

    /// Delete rows matching `predicate` directly, without staging.
    pub async fn bulk_delete_where<S>(
        &self,
        session: &mut S,
        table: &str,
        predicate: &str,
    ) -> Result<SyncResult>
    where
        S: SqlSession + ?Sized,
    {
        validate_predicate(predicate)?;
        let target = TableName::parse(table, &self.default_schema)?;
        self.check_cancelled()?;

        let statement = sql::delete_where_sql(&target, predicate);
        debug!("Reconcile: {}", statement);
        let deleted = session
            .execute(&statement)
            .await
            .map_err(|e| BulkSyncError::reconcile(target.qualified(), e.to_string()))?;

        info!("Bulk delete on {}: {} rows deleted by predicate", target, deleted);
        Ok(SyncResult::deleted(deleted))
    }

    /// Set-based `UPDATE` by predicate, without staging.
    ///
    /// Each assignment is `(column, expression)`; expressions are raw SQL
    /// over the target's columns. Returns the rows updated.
    pub async fn update_where<S>(
        &self,
        session: &mut S,
        table: &str,
        assignments: &[(&str, &str)],
        predicate: Option<&str>,
    ) -> Result<u64>
    where
        S: SqlSession + ?Sized,
    {
        if assignments.is_empty() {
            return Err(BulkSyncError::Configuration(
                "update_where needs at least one assignment".to_string(),
            ));
        }
        let mut resolved = Vec::with_capacity(assignments.len());
        for (column, expr) in assignments {
            quote(column)?;
            validate_predicate(expr)?;
            resolved.push((column.to_string(), expr.to_string()));
        }
        if let Some(p) = predicate {
            validate_predicate(p)?;
        }
        let target = TableName::parse(table, &self.default_schema)?;
        self.check_cancelled()?;

        let statement = sql::update_where_sql(&target, &resolved, predicate);
        debug!("Reconcile: {}", statement);
        let updated = session
            .execute(&statement)
            .await
            .map_err(|e| BulkSyncError::reconcile(target.qualified(), e.to_string()))?;
        info!("Update on {}: {} rows updated by predicate", target, updated);
        Ok(updated)
    }

    /// Copy rows from `source` into `target`, creating `target` when it
    /// does not exist.
    ///
    /// An empty column list copies every writable column of `source`.
    /// Copying into an existing identity column writes the copied values.
    pub async fn insert_from_query<S>(
        &self,
        session: &mut S,
        source: &str,
        target: &str,
        columns: &[&str],
        predicate: Option<&str>,
    ) -> Result<u64>
    where
        S: SqlSession + ?Sized,
    {
        if let Some(p) = predicate {
            validate_predicate(p)?;
        }
        let source = TableName::parse(source, &self.default_schema)?;
        let target = TableName::parse(target, &self.default_schema)?;
        self.check_cancelled()?;

        let source_shape = introspect::resolve_shape(session, &source).await?;
        let columns: Vec<String> = if columns.is_empty() {
            source_shape
                .columns
                .iter()
                .filter(|c| c.is_writable())
                .map(|c| c.name.clone())
                .collect()
        } else {
            columns
                .iter()
                .map(|c| source_shape.require_column(c).map(|col| col.name.clone()))
                .collect::<Result<_>>()?
        };

        let target_exists = introspect::table_exists(session, &target).await?;
        let mut statement =
            sql::insert_from_query_sql(&source, &target, &columns, predicate, target_exists);
        if target_exists {
            let target_shape = introspect::resolve_shape(session, &target).await?;
            let writes_identity = target_shape
                .identity()
                .is_some_and(|id| columns.iter().any(|c| c.eq_ignore_ascii_case(&id.name)));
            if writes_identity {
                statement = format!(
                    "SET IDENTITY_INSERT {0} ON; {1} SET IDENTITY_INSERT {0} OFF;",
                    target.qualified(),
                    statement
                );
            }
        }

        debug!("Reconcile: {}", statement);
        let inserted = session
            .execute(&statement)
            .await
            .map_err(|e| BulkSyncError::reconcile(target.qualified(), e.to_string()))?;
        info!("Copied {} rows from {} into {}", inserted, source, target);
        Ok(inserted)
    }

    /// Remove every row of `table` (`TRUNCATE TABLE`).
    pub async fn clear_table<S>(&self, session: &mut S, table: &str) -> Result<()>
    where
        S: SqlSession + ?Sized,
    {
        let target = TableName::parse(table, &self.default_schema)?;
        session
            .execute(&format!("TRUNCATE TABLE {}", target.qualified()))
            .await?;
        debug!("Truncated {}", target);
        Ok(())
    }

    /// Drop `table`. With `if_exists`, a missing table is not an error.
    pub async fn drop_table<S>(&self, session: &mut S, table: &str, if_exists: bool) -> Result<()>
    where
        S: SqlSession + ?Sized,
    {
        let target = TableName::parse(table, &self.default_schema)?;
        let statement = if if_exists {
            staging::drop_statement(&target)
        } else {
            format!("DROP TABLE {}", target.qualified())
        };
        session.batch(&statement).await?;
        debug!("Dropped {}", target);
        Ok(())
    }

    /// Whether `table` exists.
    pub async fn table_exists<S>(&self, session: &mut S, table: &str) -> Result<bool>
    where
        S: SqlSession + ?Sized,
    {
        let target = TableName::parse(table, &self.default_schema)?;
        introspect::table_exists(session, &target).await
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(BulkSyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn target_table(&self, table: &str, options: &BulkOptions) -> Result<TableName> {
        let name = options.table_name.as_deref().unwrap_or(table);
        TableName::parse(name, &self.default_schema)
    }

    fn permanent_table_name(
        &self,
        target: &TableName,
        options: &BulkOptions,
    ) -> Result<Option<TableName>> {
        match (&options.permanent_table_name, options.use_permanent_table) {
            (None, _) => Ok(None),
            (Some(_), false) => Err(BulkSyncError::Configuration(
                "permanent_table_name requires use_permanent_table".to_string(),
            )),
            (Some(name), true) => {
                let schema = target.schema.as_deref().unwrap_or(&self.default_schema);
                let parsed = TableName::parse(name, schema)?;
                if parsed.is_temp() {
                    return Err(BulkSyncError::Configuration(format!(
                        "permanent_table_name cannot be a temporary table: {:?}",
                        name
                    )));
                }
                Ok(Some(parsed))
            }
        }
    }

    async fn run<S, R>(
        &self,
        session: &mut S,
        table: &str,
        operation: Operation,
        mut input: Input<'_, R>,
        options: BulkOptions,
    ) -> Result<SyncResult>
    where
        S: SqlSession + ?Sized,
        R: Record,
    {
        let started = Instant::now();
        let target = self.target_table(table, &options)?;
        let permanent_name = self.permanent_table_name(&target, &options)?;
        let use_transaction = options
            .use_transaction
            .unwrap_or(self.settings.use_transaction);
        let batch_size = options.batch_size.or(self.settings.batch_size);

        let mut progress = Progress::new(operation, &target);
        if input.records().is_empty() {
            progress.enter(Phase::Done);
            return Ok(SyncResult::default());
        }
        self.check_cancelled()?;

        let shape = introspect::resolve_shape(session, &target).await?;
        progress.enter(Phase::ShapeResolved);
        let plan = ReconcilePlan::resolve(&shape, operation, &options)?;

        session.set_pending(true);

        // Permanent staging lives outside the transaction so it survives a
        // rollback.
        let mut staging = None;
        if options.use_permanent_table {
            let created = staging::create(
                session,
                &shape.table,
                plan.staged.clone(),
                plan.map_identity,
                true,
                permanent_name.as_ref(),
            )
            .await;
            let created = match created {
                Ok(created) => created,
                Err(e) => return Err(self.fail(session, e, None, false, &mut progress).await),
            };
            progress.enter(Phase::StagingCreated);
            staging = Some(created);
        }

        let outcome = self
            .load_and_reconcile(
                session,
                &plan,
                &mut staging,
                input.records(),
                batch_size,
                use_transaction,
                &mut progress,
            )
            .await;

        let (loaded, reconciled) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                let staging = staging.as_ref();
                return Err(self
                    .fail(session, e, staging, use_transaction, &mut progress)
                    .await);
            }
        };

        let mut warnings = Vec::new();
        if plan.map_identity {
            if let (Input::Exclusive(records), Some(column)) =
                (&mut input, plan.identity_source.as_deref())
            {
                // Every loaded row of an insert should come back with a key
                let expected = match operation {
                    Operation::Insert => loaded,
                    _ => reconciled.inserted,
                };
                warnings = identity::map_back(records, column, reconciled.identities, expected);
            }
            progress.enter(Phase::IdentityMapped);
        }

        let mut staging_table = None;
        let mut released = true;
        if let Some(staging) = staging {
            if staging.permanent {
                info!("Kept staging table {} for inspection", staging.name);
                staging_table = Some(staging.name.qualified());
            } else {
                // The data is committed; a leftover temp table goes away with
                // the session.
                match staging::drop(session, &staging).await {
                    Ok(()) => progress.enter(Phase::StagingDropped),
                    Err(e) => {
                        warn!("Failed to drop staging table {}: {}", staging.name, e);
                        released = false;
                    }
                }
            }
        }
        if released {
            session.set_pending(false);
        }

        let mut result = match operation {
            Operation::Insert => SyncResult::inserted(reconciled.inserted),
            Operation::Update => SyncResult::updated(reconciled.updated),
            Operation::Merge => SyncResult::merged(reconciled.inserted, reconciled.updated),
            Operation::Delete => SyncResult::deleted(reconciled.deleted),
        };
        result.staging_table = staging_table;
        result.warnings = warnings;

        progress.enter(Phase::Done);
        info!(
            "Bulk {} on {}: {} records, {} rows affected (inserted={}, updated={}, deleted={}) in {:.2?}",
            operation,
            target,
            input.records().len(),
            result.rows_affected,
            result.rows_inserted,
            result.rows_updated,
            result.rows_deleted,
            started.elapsed()
        );
        Ok(result)
    }

    /// The transactional part of a call: create transient staging, load,
    /// reconcile, commit.
    #[allow(clippy::too_many_arguments)]
    async fn load_and_reconcile<S, R>(
        &self,
        session: &mut S,
        plan: &ReconcilePlan,
        staging: &mut Option<StagingTable>,
        records: &[R],
        batch_size: Option<usize>,
        use_transaction: bool,
        progress: &mut Progress,
    ) -> Result<(u64, Reconciled)>
    where
        S: SqlSession + ?Sized,
        R: Record,
    {
        if use_transaction {
            session.begin().await?;
        }

        let table = match staging {
            Some(table) => table,
            None => {
                let created = staging::create(
                    session,
                    &plan.target,
                    plan.staged.clone(),
                    plan.map_identity,
                    false,
                    None,
                )
                .await?;
                progress.enter(Phase::StagingCreated);
                staging.insert(created)
            }
        };

        let loaded = loader::load(session, table, records, batch_size, &self.cancel).await?;
        progress.enter(Phase::Loaded);
        debug!("Staged {} rows in {}", loaded, table.name);

        self.check_cancelled()?;
        let reconciled = reconcile::reconcile(session, plan, table).await?;
        progress.enter(Phase::Reconciled);

        if use_transaction {
            session.commit().await?;
        }
        Ok((loaded, reconciled))
    }

    /// Compensating cleanup. Returns the primary error, with any cleanup
    /// failure attached.
    async fn fail<S>(
        &self,
        session: &mut S,
        error: BulkSyncError,
        staging: Option<&StagingTable>,
        use_transaction: bool,
        progress: &mut Progress,
    ) -> BulkSyncError
    where
        S: SqlSession + ?Sized,
    {
        progress.enter(Phase::Failing);
        warn!(
            "Bulk {} on {} failed: {}",
            progress.operation, progress.target, error
        );

        let mut cleanup = Vec::new();
        if use_transaction {
            if let Err(e) = session.rollback().await {
                cleanup.push(format!("rollback: {}", e));
            }
        }
        match staging {
            Some(staging) if staging.permanent => {
                info!("Kept staging table {} for inspection", staging.name);
            }
            Some(staging) => match staging::drop(session, staging).await {
                Ok(()) => progress.enter(Phase::StagingDropped),
                Err(e) => cleanup.push(format!("drop {}: {}", staging.name, e)),
            },
            None => {}
        }

        if cleanup.is_empty() {
            session.set_pending(false);
            error
        } else {
            let cleanup = cleanup.join("; ");
            warn!("Cleanup after failed bulk {} also failed: {}", progress.operation, cleanup);
            error.with_cleanup_failure(cleanup)
        }
    }
}
