//! A pooled connection holding an open transaction

use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqlitePool;
use sqlx::{Connection, Sqlite};
use tokio::sync::{Mutex, MutexGuard};

use crate::{Error, Result};

/// Whether a finishing call did the work or found the transaction already finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
   Finished,
   AlreadyFinished,
}

/// Transaction handle shared by the default slot and named transactions.
///
/// The connection is taken out of the mutex once the transaction ends, which
/// returns it to the pool. Statements against the same handle serialize on the
/// mutex.
#[derive(Debug)]
pub(crate) struct TxHandle {
   conn: Mutex<Option<PoolConnection<Sqlite>>>,
   /// Mirrors `conn.is_none()` so the state can be read without waiting on a query
   closed: AtomicBool,
}

impl TxHandle {
   /// Acquire a connection and open a transaction on it with `statement`
   pub(crate) async fn begin(pool: &SqlitePool, statement: &'static str) -> Result<Self> {
      let mut conn = pool.acquire().await.map_err(Error::native("begin"))?;
      sqlx::query(statement)
         .execute(&mut *conn)
         .await
         .map_err(Error::native("begin"))?;

      Ok(Self {
         conn: Mutex::new(Some(conn)),
         closed: AtomicBool::new(false),
      })
   }

   pub(crate) fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<PoolConnection<Sqlite>>> {
      self.conn.lock().await
   }

   /// Commit the transaction.
   ///
   /// A failed `COMMIT` keeps the connection, so the transaction stays open and
   /// can be retried or rolled back.
   pub(crate) async fn commit(&self) -> Result<Outcome> {
      let mut guard = self.conn.lock().await;
      let Some(conn) = guard.as_mut() else {
         return Ok(Outcome::AlreadyFinished);
      };

      sqlx::query("COMMIT")
         .execute(&mut **conn)
         .await
         .map_err(Error::native("commit"))?;

      // Returns the connection to the pool
      guard.take();
      self.closed.store(true, Ordering::Release);
      Ok(Outcome::Finished)
   }

   /// Roll the transaction back. The handle is finished even if `ROLLBACK` fails.
   pub(crate) async fn rollback(&self) -> Result<Outcome> {
      let mut guard = self.conn.lock().await;
      let Some(mut conn) = guard.take() else {
         return Ok(Outcome::AlreadyFinished);
      };
      self.closed.store(true, Ordering::Release);

      if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
         // The transaction state is unknown; don't hand the connection to anyone else
         conn.close_on_drop();
         return Err(Error::native("rollback")(e));
      }
      Ok(Outcome::Finished)
   }

   /// Finish without a statement; the connection is closed instead of pooled,
   /// which makes SQLite discard the transaction.
   pub(crate) async fn discard(&self) {
      if let Some(mut conn) = self.conn.lock().await.take() {
         conn.close_on_drop();
      }
      self.closed.store(true, Ordering::Release);
   }

   /// Ping through the transaction's own connection
   pub(crate) async fn ping(&self) -> Result<Outcome> {
      let mut guard = self.conn.lock().await;
      let Some(conn) = guard.as_mut() else {
         return Ok(Outcome::AlreadyFinished);
      };
      conn.ping().await.map_err(Error::native("ping"))?;
      Ok(Outcome::Finished)
   }
}

impl Drop for TxHandle {
   fn drop(&mut self) {
      // Never return a connection with an open transaction to the pool
      if let Some(conn) = self.conn.get_mut().as_mut() {
         conn.close_on_drop();
      }
   }
}
