//! simple-db
//!
//! A small MySQL access layer: a fixed-capacity connection pool with
//! per-task transaction affinity, a verb-dispatching statement executor, a
//! fluent statement builder and entity schema reconciliation.
//!
//! ```ignore
//! let client = Client::connect(ClientConfig::from_url("mysql://root@localhost/app")?).await?;
//! let mut ctx = client.context();
//!
//! let id = client
//!     .sql(&mut ctx)
//!     .append_with("INSERT INTO article SET title = ?, body = ?", params!["title", "body"])
//!     .insert()
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod db;
pub mod error;

pub use client::Client;
pub use config::{ClientConfig, Config};
pub use db::{
    ColumnDescriptor, Entity, FieldDescriptor, FieldKind, QueryBuilder, Row, SchemaMode, SqlParam,
    SqlValue, Statement, StatementOutcome, TaskContext, Verb,
};
pub use error::{DbError, DbResult};
