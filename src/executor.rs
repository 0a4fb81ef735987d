//! Statement dispatch shared by [`Connection`](crate::Connection) and
//! [`NamedTransaction`](crate::NamedTransaction)

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Decode, FromRow, Sqlite, Type};

use crate::context::Context;
use crate::params::Params;
use crate::tx::TxHandle;
use crate::{Error, Result};

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only set for statements that start with `INSERT`. Anything else reports 0,
   /// including `WITH ... INSERT` and tables created `WITHOUT ROWID`.
   pub last_insert_id: i64,
}

/// Whether `sql` is treated as an INSERT when reporting the inserted row ID.
///
/// Only the leading keyword is inspected, case-insensitively, after trimming.
pub fn is_insert(sql: &str) -> bool {
   sql.trim_start()
      .get(..6)
      .is_some_and(|keyword| keyword.eq_ignore_ascii_case("insert"))
}

/// Where a statement runs: the pool, or the connection of an open transaction
pub struct Target {
   kind: TargetKind,
}

enum TargetKind {
   Pool(SqlitePool),
   Transaction {
      tx: Arc<TxHandle>,
      /// `None` for the default transaction slot
      id: Option<String>,
   },
}

impl Target {
   pub(crate) fn pool(pool: SqlitePool) -> Self {
      Self {
         kind: TargetKind::Pool(pool),
      }
   }

   pub(crate) fn default_transaction(tx: Arc<TxHandle>) -> Self {
      Self {
         kind: TargetKind::Transaction { tx, id: None },
      }
   }

   pub(crate) fn named_transaction(tx: Arc<TxHandle>, id: String) -> Self {
      Self {
         kind: TargetKind::Transaction { tx, id: Some(id) },
      }
   }
}

fn finished_error(id: Option<String>) -> Error {
   match id {
      Some(id) => Error::AlreadyClosed(id),
      None => Error::NoActiveTransaction,
   }
}

/// Run `$body` with `$exec` bound to the target's executor.
///
/// A transaction that finished between target selection and execution is
/// reported instead of silently falling back to the pool.
macro_rules! dispatch {
   ($target:expr, |$exec:ident| $body:expr) => {
      match $target.kind {
         TargetKind::Pool(pool) => {
            let $exec = &pool;
            $body.await
         }
         TargetKind::Transaction { tx, id } => {
            let mut guard = tx.lock().await;
            match guard.as_mut() {
               Some(conn) => {
                  let $exec = &mut **conn;
                  $body.await
               }
               None => return Err(finished_error(id)),
            }
         }
      }
   };
}

pub(crate) async fn fetch_optional<T>(target: Target, sql: &str, params: Params) -> Result<Option<T>>
where
   T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
   let (sql, args) = params.into_arguments(sql)?;
   dispatch!(target, |exec| sqlx::query_as_with::<_, T, _>(&sql, args).fetch_optional(exec))
      .map_err(Error::native("get one"))
}

pub(crate) async fn fetch_all<T>(target: Target, sql: &str, params: Params) -> Result<Vec<T>>
where
   T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
   let (sql, args) = params.into_arguments(sql)?;
   dispatch!(target, |exec| sqlx::query_as_with::<_, T, _>(&sql, args).fetch_all(exec))
      .map_err(Error::native("get all"))
}

pub(crate) async fn fetch_rows(target: Target, sql: &str, params: Params) -> Result<Vec<SqliteRow>> {
   let (sql, args) = params.into_arguments(sql)?;
   dispatch!(target, |exec| sqlx::query_with(&sql, args).fetch_all(exec))
      .map_err(Error::native("query rows"))
}

pub(crate) async fn fetch_row(target: Target, sql: &str, params: Params) -> Result<Option<SqliteRow>> {
   let (sql, args) = params.into_arguments(sql)?;
   dispatch!(target, |exec| sqlx::query_with(&sql, args).fetch_optional(exec))
      .map_err(Error::native("query row"))
}

pub(crate) async fn fetch_scalar<T>(target: Target, sql: &str, params: Params) -> Result<Option<T>>
where
   T: for<'r> Decode<'r, Sqlite> + Type<Sqlite> + Send + Unpin,
{
   let (sql, args) = params.into_arguments(sql)?;
   dispatch!(target, |exec| sqlx::query_scalar_with::<_, T, _>(&sql, args).fetch_optional(exec))
      .map_err(Error::native("get scalar"))
}

pub(crate) async fn execute(target: Target, sql: &str, params: Params) -> Result<WriteQueryResult> {
   let insert = is_insert(sql);
   let (sql, args) = params.into_arguments(sql)?;
   let result = dispatch!(target, |exec| sqlx::query_with(&sql, args).execute(exec))
      .map_err(Error::native("exec"))?;

   Ok(WriteQueryResult {
      rows_affected: result.rows_affected(),
      last_insert_id: if insert { result.last_insert_rowid() } else { 0 },
   })
}

mod sealed {
   pub trait Sealed {}

   impl Sealed for crate::Connection {}
   impl Sealed for crate::NamedTransaction {}
}

/// Query and exec operations, available on a [`Connection`](crate::Connection)
/// and on each [`NamedTransaction`](crate::NamedTransaction).
///
/// On a connection, statements run inside the default transaction when one is
/// active and against the pool otherwise. On a named transaction they always run
/// on that transaction's own connection.
///
/// Every operation pings first (subject to the ping cache) and fails without
/// running the statement if the ping fails. The `_ctx` variants abort when the
/// [`Context`] is cancelled or its deadline passes.
pub trait QueryExecutor: sealed::Sealed + Send + Sync {
   /// Ping, then choose where the next statement runs.
   #[doc(hidden)]
   fn target(&self) -> impl Future<Output = Result<Target>> + Send;

   /// Fetch one row mapped into `T`, or `None` when the query returns no rows.
   fn get_one<T>(
      &self,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Option<T>>> + Send
   where
      T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      let params = params.into();
      async move { self.get_one_ctx(&Context::background(), sql, params).await }
   }

   fn get_one_ctx<T>(
      &self,
      ctx: &Context,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Option<T>>> + Send
   where
      T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      let params = params.into();
      async move {
         ctx.run("get one", async {
            let target = self.target().await?;
            fetch_optional(target, sql, params).await
         })
         .await
      }
   }

   /// Fetch every row mapped into `T`. An empty `Vec` means nothing was found.
   fn get_all<T>(
      &self,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Vec<T>>> + Send
   where
      T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      let params = params.into();
      async move { self.get_all_ctx(&Context::background(), sql, params).await }
   }

   fn get_all_ctx<T>(
      &self,
      ctx: &Context,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Vec<T>>> + Send
   where
      T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      let params = params.into();
      async move {
         ctx.run("get all", async {
            let target = self.target().await?;
            fetch_all(target, sql, params).await
         })
         .await
      }
   }

   /// Fetch raw rows for manual decoding with [`sqlx::Row`].
   fn query_rows(
      &self,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Vec<SqliteRow>>> + Send {
      let params = params.into();
      async move { self.query_rows_ctx(&Context::background(), sql, params).await }
   }

   fn query_rows_ctx(
      &self,
      ctx: &Context,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Vec<SqliteRow>>> + Send {
      let params = params.into();
      async move {
         ctx.run("query rows", async {
            let target = self.target().await?;
            fetch_rows(target, sql, params).await
         })
         .await
      }
   }

   /// Fetch the first raw row, or `None` when the query returns no rows.
   fn query_row(
      &self,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Option<SqliteRow>>> + Send {
      let params = params.into();
      async move { self.query_row_ctx(&Context::background(), sql, params).await }
   }

   fn query_row_ctx(
      &self,
      ctx: &Context,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Option<SqliteRow>>> + Send {
      let params = params.into();
      async move {
         ctx.run("query row", async {
            let target = self.target().await?;
            fetch_row(target, sql, params).await
         })
         .await
      }
   }

   /// Fetch the first column of the first row, or `None` when there are no rows.
   fn get_scalar<T>(
      &self,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Option<T>>> + Send
   where
      T: for<'r> Decode<'r, Sqlite> + Type<Sqlite> + Send + Unpin,
   {
      let params = params.into();
      async move { self.get_scalar_ctx(&Context::background(), sql, params).await }
   }

   fn get_scalar_ctx<T>(
      &self,
      ctx: &Context,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<Option<T>>> + Send
   where
      T: for<'r> Decode<'r, Sqlite> + Type<Sqlite> + Send + Unpin,
   {
      let params = params.into();
      async move {
         ctx.run("get scalar", async {
            let target = self.target().await?;
            fetch_scalar(target, sql, params).await
         })
         .await
      }
   }

   /// Execute a write statement.
   ///
   /// `last_insert_id` is only read for statements classified by [`is_insert`].
   fn exec(
      &self,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<WriteQueryResult>> + Send {
      let params = params.into();
      async move { self.exec_ctx(&Context::background(), sql, params).await }
   }

   fn exec_ctx(
      &self,
      ctx: &Context,
      sql: &str,
      params: impl Into<Params>,
   ) -> impl Future<Output = Result<WriteQueryResult>> + Send {
      let params = params.into();
      async move {
         ctx.run("exec", async {
            let target = self.target().await?;
            execute(target, sql, params).await
         })
         .await
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_is_insert() {
      assert!(is_insert("INSERT INTO t VALUES (1)"));
      assert!(is_insert("  \n\tinsert into t values (1)"));
      assert!(is_insert("Insert Or Replace INTO t VALUES (1)"));
      assert!(!is_insert("UPDATE t SET a = 1"));
      assert!(!is_insert("DELETE FROM t"));
      assert!(!is_insert("WITH x AS (SELECT 1) INSERT INTO t SELECT * FROM x"));
      assert!(!is_insert("ins"));
      assert!(!is_insert(""));
   }

   #[test]
   fn test_is_insert_multibyte_prefix() {
      // Slicing must not panic on a char boundary
      assert!(!is_insert("é INSERT"));
   }
}
