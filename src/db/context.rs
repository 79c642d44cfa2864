//! Per-task session state.
//!
//! A [`TaskContext`] belongs to exactly one caller and is passed as
//! `&mut TaskContext` into every client call. It holds the connection the
//! task is currently using, the statement in flight, and whether a
//! transaction is open.
//!
//! # Connection affinity
//!
//! Outside a transaction the context holds a connection only for the
//! duration of a single statement. Inside a transaction the connection is
//! pinned until `commit` or `rollback`.
//!
//! # Drop behavior
//!
//! Dropping a context with an open transaction spawns a tokio task that
//! issues `ROLLBACK` on the pinned connection and then returns it to the
//! pool. If the rollback fails, or no runtime is available to run it, the
//! connection is discarded instead, so no later borrower inherits the open
//! transaction. The server rolls the transaction back when the link drops.
//! Always finish transactions explicitly.

use crate::db::executor::Verb;
use crate::db::pool::PooledConnection;
use crate::db::schema::SchemaMode;
use sqlx::Executor;
use sqlx::mysql::MySqlConnection;
use tracing::{error, warn};

/// A statement that has been handed to the executor and not yet finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStatement {
    pub sql: String,
    pub verb: Verb,
}

/// Session state owned by one task.
#[derive(Debug, Default)]
pub struct TaskContext {
    pub(crate) active_connection: Option<PooledConnection<MySqlConnection>>,
    pub(crate) active_statement: Option<ActiveStatement>,
    pub(crate) in_transaction: bool,
    verbose_logging: bool,
    schema_mode: SchemaMode,
}

impl TaskContext {
    pub fn new(verbose_logging: bool, schema_mode: SchemaMode) -> Self {
        Self {
            active_connection: None,
            active_statement: None,
            in_transaction: false,
            verbose_logging,
            schema_mode,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Pool slot of the connection this context holds, if any.
    pub fn connection_slot(&self) -> Option<usize> {
        self.active_connection.as_ref().map(|conn| conn.slot())
    }

    pub fn has_connection(&self) -> bool {
        self.active_connection.is_some()
    }

    pub fn active_statement(&self) -> Option<&ActiveStatement> {
        self.active_statement.as_ref()
    }

    /// True when no transaction is open, no statement is pending and no
    /// connection is held.
    pub fn is_idle(&self) -> bool {
        !self.in_transaction && self.active_statement.is_none() && self.active_connection.is_none()
    }

    pub fn verbose_logging(&self) -> bool {
        self.verbose_logging
    }

    pub fn set_verbose_logging(&mut self, enabled: bool) {
        self.verbose_logging = enabled;
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.schema_mode
    }

    pub fn set_schema_mode(&mut self, mode: SchemaMode) {
        self.schema_mode = mode;
    }

    pub(crate) fn begin_statement(&mut self, sql: &str, verb: &Verb) {
        self.active_statement = Some(ActiveStatement {
            sql: sql.to_string(),
            verb: verb.clone(),
        });
    }

    pub(crate) fn end_statement(&mut self) {
        self.active_statement = None;
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        let Some(mut conn) = self.active_connection.take() else {
            return;
        };

        warn!(
            pool = conn.pool_id(),
            slot = conn.slot(),
            "Task context dropped with an open transaction, rolling back"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let rolled_back = (&mut *conn).execute("ROLLBACK").await;
                    match rolled_back {
                        Ok(_) => drop(conn),
                        Err(e) => {
                            error!(error = %e, "Rollback of abandoned transaction failed");
                            conn.discard();
                        }
                    }
                });
            }
            Err(_) => {
                error!("No tokio runtime available, discarding connection of abandoned transaction");
                conn.discard();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_idle() {
        let ctx = TaskContext::new(true, SchemaMode::Update);
        assert!(ctx.is_idle());
        assert!(ctx.verbose_logging());
        assert_eq!(ctx.schema_mode(), SchemaMode::Update);
        assert!(!ctx.in_transaction());
    }

    #[test]
    fn test_statement_tracking() {
        let mut ctx = TaskContext::default();
        ctx.begin_statement("SELECT 1", &Verb::Select);
        assert!(!ctx.is_idle());
        assert_eq!(ctx.active_statement().map(|s| &s.verb), Some(&Verb::Select));
        ctx.end_statement();
        assert!(ctx.is_idle());
    }

    #[test]
    fn test_drop_without_connection_is_quiet() {
        let mut ctx = TaskContext::default();
        ctx.in_transaction = true;
        drop(ctx);
    }
}
