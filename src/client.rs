//! Client facade.
//!
//! [`Client`] owns the connection pool and wires the task context, the
//! statement executor and the schema reconciler together. It is cheap to
//! clone and safe to share between tasks; all per-task state lives in the
//! [`TaskContext`] each caller passes in.
//!
//! # Connection affinity
//!
//! - Outside a transaction every statement acquires a connection, runs, and
//!   releases it before returning, whether it succeeded or not.
//! - `start_transaction` pins one connection to the context until `commit`
//!   or `rollback`, which always return it to the pool even when the
//!   `COMMIT`/`ROLLBACK` itself fails.
//! - A statement the server rejects inside a transaction rolls the whole
//!   transaction back before the error is returned. Errors raised after the
//!   statement ran, such as [`DbError::NoGeneratedKey`], leave it open.

use crate::config::ClientConfig;
use crate::db::bootstrap;
use crate::db::builder::QueryBuilder;
use crate::db::context::TaskContext;
use crate::db::executor::{self, StatementOutcome, Verb, log_failure, log_statement};
use crate::db::params::SqlParam;
use crate::db::pool::{ConnectionPool, PoolStatus};
use crate::db::schema::{self, ColumnDescriptor, Entity, SchemaMode, queries};
use crate::error::{DbError, DbResult};
use sqlx::mysql::MySqlConnection;
use sqlx::{Connection, Executor};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct ClientInner {
    config: ClientConfig,
    pool: ConnectionPool<MySqlConnection>,
}

/// Pooled MySQL client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl Client {
    /// Run the bootstrap script if one is configured, then open the pool.
    ///
    /// Fails without a client if the script fails or any pooled connection
    /// cannot be opened.
    pub async fn connect(config: ClientConfig) -> DbResult<Self> {
        config.validate()?;

        if let Some(script) = &config.init_script {
            bootstrap::run_script_file(&config.server_url(), script).await?;
        }

        let url = config.connection_url();
        let pool = ConnectionPool::open(config.pool_capacity, config.acquire_timeout, |slot| {
            let url = url.clone();
            async move {
                debug!(slot, "Opening pooled connection");
                MySqlConnection::connect(&url).await.map_err(DbError::from)
            }
        })
        .await?;

        info!(
            host = config.host(),
            database = config.database(),
            capacity = config.pool_capacity,
            "Client connected"
        );

        Ok(Self {
            inner: Arc::new(ClientInner { config, pool }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// A fresh context carrying the configured session flags.
    pub fn context(&self) -> TaskContext {
        TaskContext::new(
            self.inner.config.verbose_logging,
            self.inner.config.schema_mode,
        )
    }

    /// Start a statement builder bound to this client and `ctx`.
    pub fn sql<'a>(&'a self, ctx: &'a mut TaskContext) -> QueryBuilder<'a> {
        QueryBuilder::new(self, ctx)
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    /// Run one statement with positional parameters.
    ///
    /// Uses the context's pinned connection inside a transaction and a
    /// freshly acquired one otherwise.
    pub async fn run(
        &self,
        ctx: &mut TaskContext,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<StatementOutcome> {
        let verb = Verb::parse(sql)?;
        self.ensure_connection(ctx).await?;

        ctx.begin_statement(sql, &verb);
        log_statement(ctx.verbose_logging(), &verb, sql, params);
        let result = match ctx.active_connection.as_mut() {
            Some(conn) => executor::execute(conn, &verb, sql, params).await,
            None => Err(DbError::transaction("Task context lost its connection")),
        };
        ctx.end_statement();

        match result {
            Ok(outcome) => {
                if !ctx.in_transaction {
                    self.release(ctx)?;
                }
                Ok(outcome)
            }
            Err(err) => {
                log_failure(ctx.verbose_logging(), sql, &err);
                if ctx.in_transaction {
                    // The statement itself went through; the transaction stays open
                    if !err.is_execution_failure() {
                        return Err(err);
                    }
                    warn!(error = %err, "Statement failed inside transaction, rolling back");
                    if let Err(rollback_err) = self.rollback(ctx).await {
                        warn!(error = %rollback_err, "Automatic rollback failed");
                    }
                } else if let Err(release_err) = self.release(ctx) {
                    warn!(error = %release_err, "Failed to release connection");
                }
                Err(err)
            }
        }
    }

    /// Pin a connection to `ctx` and open a transaction on it.
    pub async fn start_transaction(&self, ctx: &mut TaskContext) -> DbResult<()> {
        if ctx.in_transaction {
            return Err(DbError::transaction(
                "A transaction is already open in this task context",
            ));
        }
        self.ensure_connection(ctx).await?;

        let statement = "START TRANSACTION";
        log_statement(
            ctx.verbose_logging(),
            &Verb::Other("START".to_string()),
            statement,
            &[],
        );
        let result = match ctx.active_connection.as_mut() {
            Some(conn) => (&mut **conn).execute(statement).await.map(|_| ()).map_err(DbError::from),
            None => Err(DbError::transaction("Task context lost its connection")),
        };

        if let Err(err) = result {
            if let Err(release_err) = self.release(ctx) {
                warn!(error = %release_err, "Failed to release connection");
            }
            return Err(err);
        }

        ctx.in_transaction = true;
        if let Some(conn) = &ctx.active_connection {
            info!(pool = conn.pool_id(), slot = conn.slot(), "Transaction started");
        }
        Ok(())
    }

    /// Commit the open transaction and return its connection.
    ///
    /// A no-op without an open transaction.
    pub async fn commit(&self, ctx: &mut TaskContext) -> DbResult<()> {
        self.finish_transaction(ctx, "COMMIT").await
    }

    /// Roll back the open transaction and return its connection.
    ///
    /// A no-op without an open transaction.
    pub async fn rollback(&self, ctx: &mut TaskContext) -> DbResult<()> {
        self.finish_transaction(ctx, "ROLLBACK").await
    }

    async fn finish_transaction(&self, ctx: &mut TaskContext, statement: &str) -> DbResult<()> {
        if !ctx.in_transaction {
            debug!(statement, "No open transaction, nothing to finish");
            return Ok(());
        }

        log_statement(
            ctx.verbose_logging(),
            &Verb::Other(statement.to_string()),
            statement,
            &[],
        );
        let result = match ctx.active_connection.as_mut() {
            Some(conn) => (&mut **conn).execute(statement).await.map(|_| ()).map_err(DbError::from),
            None => Err(DbError::transaction("Transaction has no pinned connection")),
        };

        // Cleanup happens whether or not the statement succeeded
        ctx.in_transaction = false;
        ctx.end_statement();
        let released = self.release(ctx);

        match &result {
            Ok(()) => info!(statement, "Transaction finished"),
            Err(e) => warn!(statement, error = %e, "Transaction finish failed"),
        }
        result.and(released)
    }

    /// Reconcile the entity's table using the context's schema mode.
    pub async fn reconcile_schema<E: Entity>(&self, ctx: &mut TaskContext) -> DbResult<Vec<String>> {
        let mode = ctx.schema_mode();
        self.reconcile_schema_with::<E>(ctx, mode).await
    }

    /// Reconcile the entity's table under `mode`.
    ///
    /// Returns the DDL statements that were executed, in order.
    pub async fn reconcile_schema_with<E: Entity>(
        &self,
        ctx: &mut TaskContext,
        mode: SchemaMode,
    ) -> DbResult<Vec<String>> {
        let table = E::table_name();
        let fields = E::fields();

        let plan = match mode {
            SchemaMode::None => Vec::new(),
            SchemaMode::Create => vec![
                schema::plan_drop(&table),
                schema::plan_create(&table, fields)?,
            ],
            SchemaMode::CreateAndDrop => vec![
                schema::plan_drop(&table),
                schema::plan_create(&table, fields)?,
                schema::plan_drop(&table),
            ],
            SchemaMode::Update => {
                let live = self.live_columns(ctx, &table).await?;
                if live.is_empty() {
                    vec![schema::plan_create(&table, fields)?]
                } else {
                    schema::plan_update(&table, fields, &live)?
                        .into_iter()
                        .collect()
                }
            }
            SchemaMode::Validate => {
                let live = self.live_columns(ctx, &table).await?;
                schema::validate(&table, fields, &live)?;
                Vec::new()
            }
        };

        for statement in &plan {
            self.run(ctx, statement, &[]).await?;
        }

        info!(
            table = %table,
            mode = %mode,
            statements = plan.len(),
            "Schema reconciled"
        );
        Ok(plan)
    }

    /// Live columns of `table` in the current database, in ordinal order.
    /// Empty when the table does not exist.
    pub async fn live_columns(
        &self,
        ctx: &mut TaskContext,
        table: &str,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        self.sql(ctx)
            .append_with(queries::LIVE_COLUMNS, [table])
            .select_rows_as()
            .await
    }

    /// Close every idle connection. Later acquires fail with
    /// [`DbError::PoolClosed`]; connections still checked out are closed
    /// when they come back.
    pub async fn close(&self) {
        for conn in self.inner.pool.close() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close connection cleanly");
            }
        }
    }

    async fn ensure_connection(&self, ctx: &mut TaskContext) -> DbResult<()> {
        if let Some(conn) = &ctx.active_connection {
            if conn.pool_id() != self.inner.pool.id() {
                return Err(DbError::InvalidRelease {
                    origin_pool: conn.pool_id(),
                    target_pool: self.inner.pool.id(),
                });
            }
            return Ok(());
        }
        ctx.active_connection = Some(self.inner.pool.acquire().await?);
        Ok(())
    }

    fn release(&self, ctx: &mut TaskContext) -> DbResult<()> {
        match ctx.active_connection.take() {
            Some(conn) => self.inner.pool.release(conn),
            None => Ok(()),
        }
    }
}
