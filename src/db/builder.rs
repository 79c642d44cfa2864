//! Fluent statement builder.
//!
//! [`Statement`] accumulates SQL fragments and positional parameters.
//! [`QueryBuilder`] wraps a statement together with the client and task
//! context it will run on, and exposes the terminal operations.
//!
//! Fragments are joined with newlines. Parameters are bound in the order
//! they were appended, one per `?`; the count is not checked before the
//! statement reaches the server.
//!
//! A builder is consumed by its terminal operation, so each logical statement
//! needs a fresh builder.

use crate::client::Client;
use crate::db::context::TaskContext;
use crate::db::executor::{StatementOutcome, first_placeholder, render_statement};
use crate::db::params::SqlParam;
use crate::db::types::{Row, SqlValue, from_row};
use crate::error::{DbError, DbResult};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;

/// Ordered SQL fragments plus their positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    fragments: Vec<String>,
    params: Vec<SqlParam>,
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment with no parameters.
    pub fn append(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.fragments.push(fragment.into());
        self
    }

    /// Append a fragment and the parameters for its placeholders.
    pub fn append_with<I, P>(&mut self, fragment: impl Into<String>, params: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<SqlParam>,
    {
        self.fragments.push(fragment.into());
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Append a fragment whose first `?` placeholder stands for a whole value
    /// list. Question marks inside quotes or comments are left alone.
    ///
    /// The placeholder is expanded to one `?` per value (`?, ?, ?`) and the
    /// values are bound in order. An empty list expands to `NULL`, which keeps
    /// `IN (...)` valid while matching nothing.
    pub fn append_in<I, P>(&mut self, fragment: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<SqlParam>,
    {
        let values: Vec<SqlParam> = values.into_iter().map(Into::into).collect();
        let expansion = if values.is_empty() {
            "NULL".to_string()
        } else {
            vec!["?"; values.len()].join(", ")
        };
        let expanded = match first_placeholder(fragment) {
            Some(at) => format!("{}{}{}", &fragment[..at], expansion, &fragment[at + 1..]),
            None => fragment.to_string(),
        };
        self.fragments.push(expanded);
        self.params.extend(values);
        self
    }

    /// SQL text, fragments joined by newlines.
    pub fn sql(&self) -> String {
        self.fragments.join("\n")
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// SQL with parameters substituted as literals. Diagnostic only.
    pub fn render(&self) -> String {
        render_statement(&self.sql(), &self.params)
    }

    pub fn into_parts(self) -> (String, Vec<SqlParam>) {
        (self.sql(), self.params)
    }
}

/// A statement under construction, bound to a client and a task context.
///
/// Obtained from [`Client::sql`].
pub struct QueryBuilder<'a> {
    client: &'a Client,
    ctx: &'a mut TaskContext,
    statement: Statement,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(client: &'a Client, ctx: &'a mut TaskContext) -> Self {
        Self {
            client,
            ctx,
            statement: Statement::new(),
        }
    }

    pub fn append(mut self, fragment: impl Into<String>) -> Self {
        self.statement.append(fragment);
        self
    }

    pub fn append_with<I, P>(mut self, fragment: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<SqlParam>,
    {
        self.statement.append_with(fragment, params);
        self
    }

    /// See [`Statement::append_in`].
    pub fn append_in<I, P>(mut self, fragment: &str, values: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<SqlParam>,
    {
        self.statement.append_in(fragment, values);
        self
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    async fn run(self) -> DbResult<StatementOutcome> {
        let (sql, params) = self.statement.into_parts();
        self.client.run(self.ctx, &sql, &params).await
    }

    /// Run an INSERT and return the first generated key.
    pub async fn insert(self) -> DbResult<u64> {
        match self.run().await? {
            StatementOutcome::GeneratedKey { key } => Ok(key),
            other => Err(DbError::unexpected_outcome("generated key", other.kind())),
        }
    }

    /// Run an UPDATE and return the affected-row count.
    pub async fn update(self) -> DbResult<u64> {
        self.affected().await
    }

    /// Run a DELETE and return the affected-row count.
    pub async fn delete(self) -> DbResult<u64> {
        self.affected().await
    }

    async fn affected(self) -> DbResult<u64> {
        match self.run().await? {
            StatementOutcome::Affected { count } => Ok(count),
            other => Err(DbError::unexpected_outcome("affected count", other.kind())),
        }
    }

    /// All result rows; an empty result is not an error.
    pub async fn select_rows(self) -> DbResult<Vec<Row>> {
        self.run().await?.into_rows()
    }

    /// The first result row, or [`DbError::EmptyResult`].
    pub async fn select_row(self) -> DbResult<Row> {
        self.select_rows()
            .await?
            .into_iter()
            .next()
            .ok_or(DbError::EmptyResult)
    }

    /// Every row mapped onto `T` by column name.
    pub async fn select_rows_as<T: DeserializeOwned>(self) -> DbResult<Vec<T>> {
        self.select_rows().await?.iter().map(from_row).collect()
    }

    /// The first row mapped onto `T` by column name.
    pub async fn select_row_as<T: DeserializeOwned>(self) -> DbResult<T> {
        from_row(&self.select_row().await?)
    }

    async fn first_value(self) -> DbResult<SqlValue> {
        let row = self.select_row().await?;
        row.into_iter()
            .next()
            .map(|(_, value)| value)
            .ok_or(DbError::EmptyResult)
    }

    pub async fn select_long(self) -> DbResult<i64> {
        let value = self.first_value().await?;
        value.as_i64().ok_or_else(|| mismatch("integer", &value))
    }

    pub async fn select_string(self) -> DbResult<String> {
        match self.first_value().await? {
            SqlValue::Text(s) | SqlValue::Decimal(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }

    pub async fn select_datetime(self) -> DbResult<NaiveDateTime> {
        let value = self.first_value().await?;
        value.as_datetime().ok_or_else(|| mismatch("datetime", &value))
    }

    pub async fn select_bool(self) -> DbResult<bool> {
        let value = self.first_value().await?;
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }

    /// First column of every row as an integer.
    pub async fn select_longs(self) -> DbResult<Vec<i64>> {
        self.select_rows()
            .await?
            .into_iter()
            .map(|row| {
                let value = row.into_iter().next().map(|(_, v)| v).unwrap_or(SqlValue::Null);
                value.as_i64().ok_or_else(|| mismatch("integer", &value))
            })
            .collect()
    }
}

fn mismatch(expected: &str, value: &SqlValue) -> DbError {
    DbError::decode(format!(
        "expected {} in first column, found {}",
        expected,
        value.type_name()
    ))
}
