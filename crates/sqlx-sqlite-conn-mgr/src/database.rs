//! Opening, pinging and closing the native SQLite pool

use sqlx::sqlite::SqlitePool;
use sqlx::Connection;
use tracing::debug;

use crate::config::{ConnectPlan, SqliteConfig, TransactionLock};
use crate::Result;

/// An open SQLite pool together with the policies it was opened with.
///
/// ## Lifecycle
///
/// ```text
/// 1. Compose the connection string from the configuration
/// 2. Parse it back into native connect options
/// 3. Open the pool (max_connections defaults to 1) and verify it with a ping
/// 4. Close when done; pooled connections are released
/// ```
#[derive(Debug, Clone)]
pub struct SqliteHandle {
   /// Pool of native connections (one by default, the single writer)
   pool: SqlitePool,

   /// Lock taken by `BEGIN` on transactions started from this handle
   transaction_lock: TransactionLock,

   /// Connection string the pool was opened from
   connection_string: String,
}

impl SqliteHandle {
   /// Open a pool for `config` and verify it with a ping.
   ///
   /// A failed verification ping closes the freshly opened pool before
   /// returning the error.
   pub async fn open(config: &SqliteConfig) -> Result<Self> {
      let connection_string = config.connection_string()?;
      let plan = ConnectPlan::parse(&connection_string)?;
      let settings = config.pool_settings();

      debug!(
         connection_string = %connection_string,
         max_connections = settings.max_connections,
         "Opening SQLite pool"
      );

      let pool = settings.pool_options().connect_with(plan.options).await?;

      if let Err(e) = ping_pool(&pool).await {
         debug!(error = %e, "Verification ping failed, closing pool");
         pool.close().await;
         return Err(e.into());
      }

      Ok(Self {
         pool,
         transaction_lock: plan.transaction_lock,
         connection_string,
      })
   }

   pub fn pool(&self) -> &SqlitePool {
      &self.pool
   }

   pub fn transaction_lock(&self) -> TransactionLock {
      self.transaction_lock
   }

   /// Statement used to open transactions on this handle
   pub fn begin_statement(&self) -> &'static str {
      self.transaction_lock.begin_statement()
   }

   pub fn connection_string(&self) -> &str {
      &self.connection_string
   }

   /// Maximum number of connections the pool will open
   pub fn max_connections(&self) -> u32 {
      self.pool.options().get_max_connections()
   }

   /// Ping the database through a pooled connection
   pub async fn ping(&self) -> Result<()> {
      ping_pool(&self.pool).await?;
      Ok(())
   }

   pub fn is_closed(&self) -> bool {
      self.pool.is_closed()
   }

   /// Close the pool, waiting for checked-out connections to be returned
   pub async fn close(&self) {
      debug!(connection_string = %self.connection_string, "Closing SQLite pool");
      self.pool.close().await;
   }
}

async fn ping_pool(pool: &SqlitePool) -> sqlx::Result<()> {
   let mut conn = pool.acquire().await?;
   conn.ping().await
}
