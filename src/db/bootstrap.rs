//! Bootstrap script execution.
//!
//! An init script is run once, before the pool is filled, over a server-level
//! connection with no default database. That lets the script drop and
//! recreate the working database itself.
//!
//! Statements are split line by line: each line is trimmed, blank lines and
//! `--` comment lines are skipped, and lines accumulate until one ends with
//! `;`. Trailing text without a terminator is run as a final statement.

use crate::error::{DbError, DbResult};
use sqlx::mysql::MySqlConnection;
use sqlx::{Connection, Executor};
use std::path::Path;
use tracing::{debug, info, warn};

/// Split a script into statements, without their terminating `;`.
pub fn split_script(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(line);

        if line.ends_with(';') {
            push_statement(&mut statements, &mut current);
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim_end_matches(';').trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// Run every statement in order on `conn`, stopping at the first failure.
/// Returns the number of statements executed.
pub async fn run_statements(conn: &mut MySqlConnection, statements: &[String]) -> DbResult<usize> {
    for (idx, statement) in statements.iter().enumerate() {
        debug!(index = idx, sql = %statement, "Running bootstrap statement");
        (&mut *conn).execute(statement.as_str()).await.map_err(|e| {
            let err = DbError::from(e);
            DbError::execution(
                format!("Bootstrap statement {} failed: {}", idx + 1, err),
                err.sql_state().map(str::to_string),
                "Fix the init script; statements before this one have already run",
            )
        })?;
    }
    Ok(statements.len())
}

/// Read the script at `path` and run it over a fresh connection to
/// `server_url`. The connection is closed afterwards.
pub async fn run_script_file(server_url: &str, path: &Path) -> DbResult<usize> {
    let script = tokio::fs::read_to_string(path).await.map_err(|e| {
        DbError::config(format!("Cannot read init script {}: {}", path.display(), e))
    })?;
    let statements = split_script(&script);

    let mut conn = MySqlConnection::connect(server_url).await?;
    let result = run_statements(&mut conn, &statements).await;
    let executed = settle(result, conn.close().await.map_err(DbError::from))?;
    info!(
        script = %path.display(),
        statements = executed,
        "Bootstrap script executed"
    );
    Ok(executed)
}

/// The script's result wins over a failure to close the connection.
fn settle(result: DbResult<usize>, closed: DbResult<()>) -> DbResult<usize> {
    match (result, closed) {
        (Ok(executed), Ok(())) => Ok(executed),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(error = %close_err, "Failed to close bootstrap connection");
            Err(err)
        }
    }
}
