//! Error types for sqlx-sqlite-conn-mgr

use thiserror::Error;

/// Errors that may occur when configuring or opening a SQLite pool
#[derive(Error, Debug)]
pub enum Error {
   /// Invalid or missing configuration, detected before any native call
   #[error("Configuration error: {0}")]
   Config(String),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
