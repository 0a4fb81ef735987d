//! Named transactions: independently committed, concurrently usable

use std::sync::{Arc, Weak};

use time::OffsetDateTime;
use tracing::debug;

use crate::connection::Shared;
use crate::executor::{QueryExecutor, Target};
use crate::tx::{Outcome, TxHandle};
use crate::{Error, Result};

/// Prefix of identifiers generated for untagged transactions
pub const GENERATED_ID_PREFIX: &str = "tx-";

/// Identifier for a transaction begun without a tag.
///
/// Built from the current time in nanoseconds. Two transactions begun within
/// the same nanosecond get the same identifier; the second registration is then
/// rejected as already active.
pub(crate) fn generate_transaction_id() -> String {
   format!(
      "{GENERATED_ID_PREFIX}{}",
      OffsetDateTime::now_utc().unix_timestamp_nanos()
   )
}

/// A transaction registered on a [`Connection`](crate::Connection) under an identifier.
///
/// Statements run on the transaction's own connection, never on the default
/// slot or the pool. Clones share the same transaction; concurrent statements
/// on it run one at a time.
///
/// ```text
/// Open --commit--> Committed
/// Open --rollback--> RolledBack
/// ```
///
/// Both end states reject `commit` with [`Error::AlreadyClosed`] and accept
/// `rollback` as a no-op, so a deferred rollback next to an explicit commit is
/// always safe.
#[derive(Clone)]
#[must_use = "an unfinished transaction stays open until the connection closes"]
pub struct NamedTransaction {
   id: String,
   tx: Arc<TxHandle>,
   parent: Weak<Shared>,
}

impl NamedTransaction {
   pub(crate) fn new(id: String, tx: Arc<TxHandle>, parent: Weak<Shared>) -> Self {
      Self { id, tx, parent }
   }

   pub fn id(&self) -> &str {
      &self.id
   }

   /// Whether the transaction was committed or rolled back
   pub fn is_closed(&self) -> bool {
      self.tx.is_closed()
   }

   /// Commit the transaction.
   ///
   /// On failure the transaction stays open and registered; it can be retried
   /// or rolled back.
   pub async fn commit(&self) -> Result<()> {
      match self.tx.commit().await? {
         Outcome::Finished => {
            debug!(tx_id = %self.id, "Named transaction committed");
            self.deregister().await;
            Ok(())
         }
         Outcome::AlreadyFinished => Err(Error::AlreadyClosed(self.id.clone())),
      }
   }

   /// Roll the transaction back.
   ///
   /// Succeeds without doing anything if the transaction already ended. A failed
   /// rollback still ends the transaction; the error is returned.
   pub async fn rollback(&self) -> Result<()> {
      let result = self.tx.rollback().await;
      if matches!(result, Ok(Outcome::AlreadyFinished)) {
         return Ok(());
      }

      debug!(tx_id = %self.id, "Named transaction rolled back");
      self.deregister().await;
      result.map(|_| ())
   }

   async fn deregister(&self) {
      if let Some(parent) = self.parent.upgrade() {
         parent.deregister(&self.id, &self.tx).await;
      }
   }
}

impl std::fmt::Debug for NamedTransaction {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("NamedTransaction")
         .field("id", &self.id)
         .field("closed", &self.is_closed())
         .finish()
   }
}

impl QueryExecutor for NamedTransaction {
   async fn target(&self) -> Result<Target> {
      if self.tx.is_closed() {
         return Err(Error::AlreadyClosed(self.id.clone()));
      }
      let parent = self.parent.upgrade().ok_or(Error::NotConnected)?;

      if !parent.ping_is_fresh().await? {
         let result = self.tx.ping().await;
         parent.record_ping(matches!(result, Ok(Outcome::Finished))).await;
         if result? == Outcome::AlreadyFinished {
            return Err(Error::AlreadyClosed(self.id.clone()));
         }
      }

      Ok(Target::named_transaction(Arc::clone(&self.tx), self.id.clone()))
   }
}
