/// Result type alias for connection and transaction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for SQLite access.
///
/// Configuration and state misuse are reported before any native call; engine
/// failures arrive as [`Error::Native`], tagged with the operation that failed.
/// "No rows" is never an error: lookups return `Ok(None)` or an empty `Vec`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Invalid or missing configuration.
   #[error("configuration error: {0}")]
   Config(String),

   /// The operation needs an open database handle.
   #[error("database is not connected")]
   NotConnected,

   /// `open` was called on a connection that is already open.
   #[error("database is already connected")]
   AlreadyConnected,

   /// A transaction with this identifier is already open.
   #[error("transaction already active: {0}")]
   TransactionAlreadyActive(String),

   /// Commit or rollback without a default transaction.
   #[error("no active transaction")]
   NoActiveTransaction,

   /// The named transaction has already been committed or rolled back.
   #[error("transaction {0} is already closed")]
   AlreadyClosed(String),

   /// A named parameter used in the SQL text is absent from the supplied map.
   #[error("missing named parameter ':{0}'")]
   MissingParameter(String),

   /// Error from the SQLite driver.
   #[error("{operation}: {source}")]
   Native {
      operation: &'static str,
      #[source]
      source: sqlx::Error,
   },
}

impl Error {
   /// Wrap a driver error with the name of the operation that produced it.
   pub(crate) fn native(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
      move |source| Error::Native { operation, source }
   }

   pub(crate) fn from_conn_mgr(operation: &'static str, err: sqlx_sqlite_conn_mgr::Error) -> Self {
      match err {
         sqlx_sqlite_conn_mgr::Error::Config(msg) => Error::Config(msg),
         sqlx_sqlite_conn_mgr::Error::Sqlx(source) => Error::Native { operation, source },
      }
   }

   /// The driver error behind a [`Error::Native`], if any.
   pub fn as_native(&self) -> Option<&sqlx::Error> {
      match self {
         Error::Native { source, .. } => Some(source),
         _ => None,
      }
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Native { source, .. } => {
            if let Some(code) = source.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "NATIVE_ERROR".to_string()
         }
         Error::Config(_) => "CONFIG_ERROR".to_string(),
         Error::NotConnected => "NOT_CONNECTED".to_string(),
         Error::AlreadyConnected => "ALREADY_CONNECTED".to_string(),
         Error::TransactionAlreadyActive(_) => "TRANSACTION_ALREADY_ACTIVE".to_string(),
         Error::NoActiveTransaction => "NO_ACTIVE_TRANSACTION".to_string(),
         Error::AlreadyClosed(_) => "ALREADY_CLOSED".to_string(),
         Error::MissingParameter(_) => "MISSING_PARAMETER".to_string(),
      }
   }
}
