//! The shared database handle, its default transaction slot and ping cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sqlx_sqlite_conn_mgr::{PingCache, SqliteConfig, SqliteHandle};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::executor::{QueryExecutor, Target};
use crate::transactions::{NamedTransaction, generate_transaction_id};
use crate::tx::{Outcome, TxHandle};
use crate::{Error, Result};

/// Identifier used in errors about the default transaction slot
const DEFAULT_SLOT: &str = "default";

/// A single SQLite database handle shared by every caller.
///
/// ## Locking
///
/// One reader/writer lock guards the pool, the default transaction slot, the
/// named transaction registry and the ping cache. Each transaction (default or
/// named) additionally has its own mutex, so statements on one transaction
/// serialize without holding the connection-wide lock. The connection lock is
/// never held while waiting on the pool or on a transaction mutex.
///
/// ## Usage Pattern
///
/// ```text
/// 1. Connection::new(config) then open()
/// 2. Query/exec directly, or inside begin()/commit()/rollback()
/// 3. Or begin_tx(tag) for independently committed transactions
/// 4. close() rolls back anything still open
/// ```
///
/// Cloning is cheap and every clone refers to the same handle.
#[derive(Clone)]
pub struct Connection {
   shared: Arc<Shared>,
}

pub(crate) struct Shared {
   config: SqliteConfig,
   state: RwLock<State>,
}

struct State {
   handle: Option<SqliteHandle>,
   default_tx: Option<Arc<TxHandle>>,
   named: HashMap<String, Arc<TxHandle>>,
   ping: PingCache,
   /// Bumped on every successful open
   generation: u64,
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
   pub connected: bool,
   pub default_transaction_active: bool,
   pub named_transactions: usize,
   /// Pings that reached the database rather than the cache
   pub native_pings: u64,
}

enum Pinger {
   Handle(SqliteHandle),
   Transaction(Arc<TxHandle>, SqliteHandle),
}

impl Connection {
   /// Create an unopened connection for `config`
   pub fn new(config: SqliteConfig) -> Self {
      let ping = PingCache::new(config.ping_frequency_secs);
      Self {
         shared: Arc::new(Shared {
            config,
            state: RwLock::new(State {
               handle: None,
               default_tx: None,
               named: HashMap::new(),
               ping,
               generation: 0,
            }),
         }),
      }
   }

   pub fn config(&self) -> &SqliteConfig {
      &self.shared.config
   }

   /// Connection string this connection opens
   pub fn connection_string(&self) -> Result<String> {
      self
         .shared
         .config
         .connection_string()
         .map_err(|e| Error::from_conn_mgr("connection string", e))
   }

   /// Open the database handle.
   ///
   /// Fails with [`Error::AlreadyConnected`] if a handle exists. Two callers
   /// racing past the initial check both open a pool; the loser closes its own
   /// and reports `AlreadyConnected` instead of replacing the winner's.
   pub async fn open(&self) -> Result<()> {
      if self.shared.state.read().await.handle.is_some() {
         return Err(Error::AlreadyConnected);
      }

      let handle = SqliteHandle::open(&self.shared.config)
         .await
         .map_err(|e| Error::from_conn_mgr("open", e))?;

      let mut state = self.shared.state.write().await;
      if state.handle.is_some() {
         drop(state);
         debug!("Lost open race, closing redundant pool");
         handle.close().await;
         return Err(Error::AlreadyConnected);
      }

      debug!(
         path = %self.shared.config.path,
         max_connections = handle.max_connections(),
         "Database opened"
      );
      state.handle = Some(handle);
      state.generation += 1;
      state.ping = PingCache::new(self.shared.config.ping_frequency_secs);
      state.ping.record_success(Instant::now());
      Ok(())
   }

   /// Close the handle, rolling back every open transaction first.
   ///
   /// Rollback failures here are logged and otherwise ignored. Closing a closed
   /// connection is a no-op.
   pub async fn close(&self) -> Result<()> {
      // Detach everything first; closing the pool waits for checked-out
      // connections, including one a concurrent begin is about to register.
      let (handle, default_tx, named) = {
         let mut state = self.shared.state.write().await;
         state.ping.reset();
         (
            state.handle.take(),
            state.default_tx.take(),
            std::mem::take(&mut state.named),
         )
      };

      if let Some(tx) = default_tx {
         if let Err(e) = tx.rollback().await {
            warn!(error = %e, "Rollback of default transaction failed during close");
         }
      }

      debug!("Rolling back {} named transaction(s)", named.len());
      for (id, tx) in named {
         match tx.rollback().await {
            Ok(Outcome::Finished) => debug!(tx_id = %id, "Named transaction rolled back on close"),
            Ok(Outcome::AlreadyFinished) => {}
            Err(e) => warn!(tx_id = %id, error = %e, "Rollback of named transaction failed during close"),
         }
      }

      if let Some(handle) = handle {
         handle.close().await;
         debug!(path = %self.shared.config.path, "Database closed");
      }
      Ok(())
   }

   pub async fn is_connected(&self) -> bool {
      self.shared.state.read().await.handle.is_some()
   }

   /// Maximum pooled connections, or `None` when not connected
   pub async fn max_connections(&self) -> Option<u32> {
      self
         .shared
         .state
         .read()
         .await
         .handle
         .as_ref()
         .map(SqliteHandle::max_connections)
   }

   pub async fn stats(&self) -> ConnectionStats {
      let state = self.shared.state.read().await;
      ConnectionStats {
         connected: state.handle.is_some(),
         default_transaction_active: state.default_tx.is_some(),
         named_transactions: state.named.len(),
         native_pings: state.ping.native_pings(),
      }
   }

   /// Check that the database is reachable.
   ///
   /// Answered from the ping cache while the last successful ping is inside the
   /// configured window. Otherwise pings through the default transaction's
   /// connection when one is active, or a pooled connection.
   pub async fn ping(&self) -> Result<()> {
      let pinger = {
         let state = self.shared.state.read().await;
         let handle = state.handle.as_ref().ok_or(Error::NotConnected)?;
         if state.ping.is_fresh(Instant::now()) {
            return Ok(());
         }
         match &state.default_tx {
            Some(tx) => Pinger::Transaction(Arc::clone(tx), handle.clone()),
            None => Pinger::Handle(handle.clone()),
         }
      };

      let result = match pinger {
         Pinger::Handle(handle) => ping_handle(&handle).await,
         Pinger::Transaction(tx, handle) => match tx.ping().await {
            Ok(Outcome::Finished) => Ok(()),
            // Committed in the meantime; the pool is free again
            Ok(Outcome::AlreadyFinished) => ping_handle(&handle).await,
            Err(e) => Err(e),
         },
      };

      self.shared.record_ping(result.is_ok()).await;
      result
   }

   /// Begin the default transaction.
   ///
   /// Waiting for a pooled connection happens without the connection lock, so
   /// named transactions keep running while `begin` waits for one to finish.
   pub async fn begin(&self) -> Result<()> {
      let (handle, generation) = {
         let state = self.shared.state.read().await;
         let handle = state.handle.as_ref().ok_or(Error::NotConnected)?;
         if state.default_tx.is_some() {
            return Err(Error::TransactionAlreadyActive(DEFAULT_SLOT.to_string()));
         }
         (handle.clone(), state.generation)
      };

      let tx = Arc::new(TxHandle::begin(handle.pool(), handle.begin_statement()).await?);

      let mut state = self.shared.state.write().await;
      let conflict = if !state.is_open_at(generation) {
         Some(Error::NotConnected)
      } else if state.default_tx.is_some() {
         Some(Error::TransactionAlreadyActive(DEFAULT_SLOT.to_string()))
      } else {
         None
      };
      if let Some(err) = conflict {
         drop(state);
         rollback_unregistered(&tx, DEFAULT_SLOT).await;
         return Err(err);
      }

      state.default_tx = Some(tx);
      debug!("Default transaction started");
      Ok(())
   }

   /// Commit the default transaction.
   ///
   /// The slot is cleared whether or not the commit succeeds; a transaction whose
   /// commit failed is discarded.
   pub async fn commit(&self) -> Result<()> {
      let tx = self.take_default_tx().await?;
      match tx.commit().await {
         Ok(_) => {
            debug!("Default transaction committed");
            Ok(())
         }
         Err(e) => {
            tx.discard().await;
            Err(e)
         }
      }
   }

   /// Roll back the default transaction. The slot is cleared even if the rollback fails.
   pub async fn rollback(&self) -> Result<()> {
      let tx = self.take_default_tx().await?;
      tx.rollback().await?;
      debug!("Default transaction rolled back");
      Ok(())
   }

   async fn take_default_tx(&self) -> Result<Arc<TxHandle>> {
      let mut state = self.shared.state.write().await;
      if state.handle.is_none() {
         return Err(Error::NotConnected);
      }
      state.default_tx.take().ok_or(Error::NoActiveTransaction)
   }

   /// Begin a named transaction, independent of the default slot.
   ///
   /// An empty `tag` gets a generated identifier. A tag that names a transaction
   /// which is still open fails with [`Error::TransactionAlreadyActive`].
   pub async fn begin_tx(&self, tag: &str) -> Result<NamedTransaction> {
      let id = if tag.is_empty() {
         generate_transaction_id()
      } else {
         tag.to_string()
      };

      let (handle, generation) = {
         let state = self.shared.state.read().await;
         let handle = state.handle.as_ref().ok_or(Error::NotConnected)?;
         if state.is_registered(&id) {
            return Err(Error::TransactionAlreadyActive(id));
         }
         (handle.clone(), state.generation)
      };

      let tx = Arc::new(TxHandle::begin(handle.pool(), handle.begin_statement()).await?);

      let mut state = self.shared.state.write().await;
      let conflict = if !state.is_open_at(generation) {
         Some(Error::NotConnected)
      } else if state.is_registered(&id) {
         Some(Error::TransactionAlreadyActive(id.clone()))
      } else {
         None
      };
      if let Some(err) = conflict {
         drop(state);
         rollback_unregistered(&tx, &id).await;
         return Err(err);
      }

      state.named.insert(id.clone(), Arc::clone(&tx));
      debug!(tx_id = %id, "Named transaction started");
      Ok(NamedTransaction::new(id, tx, Arc::downgrade(&self.shared)))
   }
}

impl State {
   fn is_registered(&self, id: &str) -> bool {
      self.named.get(id).is_some_and(|tx| !tx.is_closed())
   }

   /// Whether the handle opened at `generation` is still the open one
   fn is_open_at(&self, generation: u64) -> bool {
      self.handle.is_some() && self.generation == generation
   }
}

/// Roll back a transaction that lost the race to register
async fn rollback_unregistered(tx: &TxHandle, id: &str) {
   if let Err(e) = tx.rollback().await {
      warn!(tx_id = %id, error = %e, "Rollback of unregistered transaction failed");
   }
}

impl Shared {
   /// Whether a ping can be answered from the cache
   pub(crate) async fn ping_is_fresh(&self) -> Result<bool> {
      let state = self.state.read().await;
      if state.handle.is_none() {
         return Err(Error::NotConnected);
      }
      Ok(state.ping.is_fresh(Instant::now()))
   }

   pub(crate) async fn record_ping(&self, success: bool) {
      let mut state = self.state.write().await;
      state.ping.record_native();
      if success {
         state.ping.record_success(Instant::now());
      }
   }

   /// Remove `id` from the registry if it still refers to `tx`
   pub(crate) async fn deregister(&self, id: &str, tx: &Arc<TxHandle>) {
      let mut state = self.state.write().await;
      if state.named.get(id).is_some_and(|current| Arc::ptr_eq(current, tx)) {
         state.named.remove(id);
         debug!(tx_id = %id, "Named transaction deregistered");
      }
   }
}

async fn ping_handle(handle: &SqliteHandle) -> Result<()> {
   handle
      .ping()
      .await
      .map_err(|e| Error::from_conn_mgr("ping", e))
}

impl QueryExecutor for Connection {
   async fn target(&self) -> Result<Target> {
      self.ping().await?;

      let state = self.shared.state.read().await;
      let handle = state.handle.as_ref().ok_or(Error::NotConnected)?;
      Ok(match &state.default_tx {
         Some(tx) => Target::default_transaction(Arc::clone(tx)),
         None => Target::pool(handle.pool().clone()),
      })
   }
}
