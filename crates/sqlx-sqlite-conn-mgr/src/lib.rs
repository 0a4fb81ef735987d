//! # sqlx-sqlite-conn-mgr
//!
//! A minimal wrapper around SQLx that turns a declarative configuration into an
//! open, verified SQLite pool with single-writer defaults.
//!
//! ## Core Types
//!
//! - **[`SqliteConfig`]**: Database path, open mode, pragmas and pool sizing
//! - **[`ConnectPlan`]**: Native connect options parsed from a connection string
//! - **[`SqliteHandle`]**: The open pool plus the transaction lock it was opened with
//! - **[`PingCache`]**: Ping window bookkeeping
//! - **[`Error`]**: Error type for configuration and native failures
//!
//! ## Defaults
//!
//! - **Single writer**: one pooled connection unless configured otherwise
//! - **WAL journal**, `NORMAL` sync, `EXCLUSIVE` locking, foreign keys on
//! - **Immediate transactions**: `BEGIN IMMEDIATE` takes the write lock up front

mod config;
mod database;
mod error;
mod ping;

pub use config::{
   ConnectPlan, JournalMode, LockingMode, OpenMode, PoolSettings, SqliteConfig, Synchronous,
   TransactionLock,
};
pub use database::SqliteHandle;
pub use error::{Error, Result};
pub use ping::{DEFAULT_PING_WINDOW, PingCache, ping_window};
