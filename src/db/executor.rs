//! Statement execution engine.
//!
//! Statements are dispatched on their leading keyword ([`Verb`]) and the
//! driver result is normalized into a [`StatementOutcome`]:
//! - `SELECT` materializes every row
//! - `INSERT` reports the first generated key
//! - `UPDATE` / `DELETE` report the affected-row count
//! - anything else runs generically and returns whatever the server yields
//!
//! The executor only ever sees one connection and finishes with it before
//! returning, so no statement or cursor outlives the call.

use crate::db::params::{SqlParam, bind_mysql_param};
use crate::db::types::{Row, decode_row};
use crate::error::{DbError, DbResult};
use futures_util::TryStreamExt;
use serde::Serialize;
use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use sqlx::mysql::MySqlConnection;
use sqlx::{Either, Execute, Executor, MySql};
use std::fmt;
use tracing::{debug, info, warn};

/// Target for verbose statement logging.
pub const SQL_LOG_TARGET: &str = "simple_db::sql";

/// Leading SQL keyword of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Select,
    Insert,
    Update,
    Delete,
    /// Any other keyword, upper-cased.
    Other(String),
}

impl Verb {
    /// Extract the verb from the first word token of `sql`, ignoring case,
    /// leading whitespace and comments.
    pub fn parse(sql: &str) -> DbResult<Self> {
        let word = match Tokenizer::new(&MySqlDialect {}, sql).tokenize() {
            Ok(tokens) => tokens
                .into_iter()
                .find(|t| !matches!(t, Token::Whitespace(_)))
                .and_then(|t| match t {
                    Token::Word(w) if w.quote_style.is_none() => Some(w.value),
                    _ => None,
                }),
            // Unbalanced quotes further in still have a readable first word
            Err(_) => sql
                .split_whitespace()
                .next()
                .filter(|w| w.chars().all(|c| c.is_ascii_alphabetic() || c == '_'))
                .map(str::to_string),
        };

        let word = word.ok_or_else(|| DbError::malformed_query(sql))?;
        Ok(match word.to_ascii_uppercase().as_str() {
            "SELECT" => Verb::Select,
            "INSERT" => Verb::Insert,
            "UPDATE" => Verb::Update,
            "DELETE" => Verb::Delete,
            other => Verb::Other(other.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verb::Select => "SELECT",
            Verb::Insert => "INSERT",
            Verb::Update => "UPDATE",
            Verb::Delete => "DELETE",
            Verb::Other(word) => word,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementOutcome {
    Rows { rows: Vec<Row> },
    GeneratedKey { key: u64 },
    Affected { count: u64 },
    /// Uninterpreted result of a statement with any other verb.
    Generic { rows: Vec<Row>, rows_affected: u64 },
}

impl StatementOutcome {
    /// Short name used in outcome-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rows { .. } => "rows",
            Self::GeneratedKey { .. } => "generated key",
            Self::Affected { .. } => "affected count",
            Self::Generic { .. } => "generic result",
        }
    }

    /// Result rows, for outcomes that carry any.
    pub fn into_rows(self) -> DbResult<Vec<Row>> {
        match self {
            Self::Rows { rows } | Self::Generic { rows, .. } => Ok(rows),
            other => Err(DbError::unexpected_outcome("rows", other.kind())),
        }
    }
}

/// Execute `sql` with positional `params` on `conn` according to `verb`.
///
/// Parameter count mismatches are not checked here; the server's binding
/// error surfaces as [`DbError::Execution`].
pub async fn execute(
    conn: &mut MySqlConnection,
    verb: &Verb,
    sql: &str,
    params: &[SqlParam],
) -> DbResult<StatementOutcome> {
    debug!(verb = %verb, params = params.len(), "Dispatching statement");

    // Without params, send raw SQL (text protocol); some statements such as
    // CREATE PROCEDURE cannot be prepared
    if params.is_empty() {
        dispatch(conn, verb, sql).await
    } else {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }
        dispatch(conn, verb, query).await
    }
}

async fn dispatch<'q, E>(
    conn: &mut MySqlConnection,
    verb: &Verb,
    statement: E,
) -> DbResult<StatementOutcome>
where
    E: 'q + Execute<'q, MySql>,
{
    match verb {
        Verb::Select => {
            let rows = (&mut *conn).fetch_all(statement).await?;
            Ok(StatementOutcome::Rows {
                rows: rows.iter().map(decode_row).collect::<DbResult<_>>()?,
            })
        }
        Verb::Insert => {
            let result = (&mut *conn).execute(statement).await?;
            // For multi-row inserts MySQL reports the first generated id
            match result.last_insert_id() {
                0 => Err(DbError::NoGeneratedKey),
                key => Ok(StatementOutcome::GeneratedKey { key }),
            }
        }
        Verb::Update | Verb::Delete => {
            let result = (&mut *conn).execute(statement).await?;
            Ok(StatementOutcome::Affected {
                count: result.rows_affected(),
            })
        }
        Verb::Other(_) => {
            let mut rows = Vec::new();
            let mut rows_affected = 0;
            let mut stream = (&mut *conn).fetch_many(statement);
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(result) => rows_affected += result.rows_affected(),
                    Either::Right(row) => rows.push(decode_row(&row)?),
                }
            }
            Ok(StatementOutcome::Generic {
                rows,
                rows_affected,
            })
        }
    }
}

/// Render a statement with its parameters substituted as literals.
///
/// Diagnostic only. Placeholders inside quoted strings and comments are left
/// alone. If the placeholder count does not match the parameters, the raw SQL
/// is returned with the parameter list appended.
pub fn render_statement(sql: &str, params: &[SqlParam]) -> String {
    let fallback = || {
        if params.is_empty() {
            sql.to_string()
        } else {
            let list: Vec<String> = params.iter().map(ToString::to_string).collect();
            format!("{sql} -- params: [{}]", list.join(", "))
        }
    };

    let Ok(tokens) = Tokenizer::new(&MySqlDialect {}, sql).tokenize() else {
        return fallback();
    };

    let mut rendered = String::with_capacity(sql.len());
    let mut next = params.iter();
    for token in &tokens {
        match token {
            Token::Placeholder(p) if p == "?" => match next.next() {
                Some(param) => rendered.push_str(&param.to_string()),
                None => return fallback(),
            },
            other => rendered.push_str(&other.to_string()),
        }
    }
    if next.next().is_some() {
        return fallback();
    }
    rendered
}

/// Byte offset of the first `?` placeholder token in `sql`.
///
/// Question marks inside quoted strings, quoted identifiers and comments are
/// not placeholders. Text the tokenizer rejects, such as a fragment with an
/// unbalanced quote, falls back to the first `?` character.
pub(crate) fn first_placeholder(sql: &str) -> Option<usize> {
    let tokens = match Tokenizer::new(&MySqlDialect {}, sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(_) => return sql.find('?'),
    };
    let location = tokens
        .into_iter()
        .find(|t| matches!(&t.token, Token::Placeholder(p) if p == "?"))?
        .span
        .start;

    // Locations are 1-based and count characters, restarting after '\n'
    let (mut line, mut column) = (1, 1);
    for (offset, ch) in sql.char_indices() {
        if line == location.line && column == location.column {
            return Some(offset);
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    None
}

/// Emit the rendered statement when verbose logging is on.
pub(crate) fn log_statement(verbose: bool, verb: &Verb, sql: &str, params: &[SqlParam]) {
    if verbose {
        info!(target: SQL_LOG_TARGET, verb = %verb, "{}", render_statement(sql, params));
    }
}

/// Emit a failed statement and its error when verbose logging is on.
pub(crate) fn log_failure(verbose: bool, sql: &str, err: &DbError) {
    if verbose {
        warn!(target: SQL_LOG_TARGET, sql = %sql, error = %err, "Statement failed");
    }
}
