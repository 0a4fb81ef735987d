//! # sqlx-sqlite-access
//!
//! Race-free access to a single-writer SQLite database from many tasks.
//!
//! ## Core Types
//!
//! - **[`Connection`]**: The shared handle: open/close/ping, the default transaction slot,
//!   and the registry of named transactions
//! - **[`NamedTransaction`]**: An explicitly tagged transaction, committed or rolled back on
//!   its own schedule
//! - **[`QueryExecutor`]**: Query and exec operations implemented by both of the above
//! - **[`Params`]**: Positional or named statement parameters
//! - **[`Context`]**: Deadline and cancellation for a single operation
//! - **[`Error`]**: Distinguishes configuration, state misuse and driver failures
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_sqlite_access::{Connection, QueryExecutor, SqliteConfig};
//!
//! # async fn example() -> Result<(), sqlx_sqlite_access::Error> {
//! let conn = Connection::new(SqliteConfig::new("app.db"));
//! conn.open().await?;
//! conn.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", ()).await?;
//!
//! let tx = conn.begin_tx("import").await?;
//! let result = tx.exec("INSERT INTO t (name) VALUES (?)", vec![json!("x")]).await?;
//! assert_eq!(result.last_insert_id, 1);
//! tx.commit().await?;
//!
//! let name: Option<String> = conn.get_scalar("SELECT name FROM t WHERE id = 1", ()).await?;
//! assert_eq!(name.as_deref(), Some("x"));
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod context;
mod error;
mod executor;
mod params;
mod transactions;
mod tx;

pub use connection::{Connection, ConnectionStats};
pub use context::{CancelHandle, Context};
pub use error::{Error, Result};
#[doc(hidden)]
pub use executor::Target;
pub use executor::{QueryExecutor, WriteQueryResult, is_insert};
pub use params::Params;
pub use transactions::{GENERATED_ID_PREFIX, NamedTransaction};

// Re-export commonly used types from dependencies
pub use sqlx::sqlite::SqliteRow;
pub use sqlx::{FromRow, Row};
pub use sqlx_sqlite_conn_mgr::{
   JournalMode, LockingMode, OpenMode, SqliteConfig, Synchronous, TransactionLock,
};
