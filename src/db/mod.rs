//! Database access layer.
//!
//! This module provides:
//! - The fixed-capacity connection pool
//! - Per-task session state
//! - Verb-dispatched statement execution
//! - The fluent statement builder
//! - Value mappings for parameters and result rows
//! - Entity schema reconciliation and bootstrap scripts

#[macro_use]
pub mod macros;
pub mod bootstrap;
pub mod builder;
pub mod context;
pub mod executor;
pub mod params;
pub mod pool;
pub mod schema;
pub mod types;

pub use builder::{QueryBuilder, Statement};
pub use context::{ActiveStatement, TaskContext};
pub use executor::{StatementOutcome, Verb};
pub use params::SqlParam;
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use schema::{ColumnDescriptor, Entity, FieldDescriptor, FieldKind, SchemaMode};
pub use types::{Row, SqlValue, from_row};
