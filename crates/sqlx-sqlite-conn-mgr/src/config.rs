//! Configuration for SQLite connections and the connection string built from it

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::sqlite::{
   SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePoolOptions, SqliteSynchronous,
};

use crate::{Error, Result};

/// Declares a configuration enum that is spelled as a string in config files and
/// connection strings. Parsing is case-insensitive; `as_str` yields the canonical spelling.
macro_rules! config_enum {
   (
      $(#[$meta:meta])*
      $name:ident, $what:literal {
         $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
      }
   ) => {
      $(#[$meta])*
      #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
      #[serde(try_from = "String")]
      pub enum $name {
         $( $(#[$vmeta])* $variant ),+
      }

      impl $name {
         /// Canonical spelling used in connection strings
         pub fn as_str(&self) -> &'static str {
            match self {
               $( $name::$variant => $text ),+
            }
         }
      }

      impl FromStr for $name {
         type Err = Error;

         fn from_str(s: &str) -> Result<Self> {
            $(
               if s.eq_ignore_ascii_case($text) {
                  return Ok($name::$variant);
               }
            )+
            Err(Error::Config(format!("unknown {} '{}'", $what, s)))
         }
      }

      impl TryFrom<String> for $name {
         type Error = Error;

         fn try_from(s: String) -> Result<Self> {
            s.parse()
         }
      }

      impl fmt::Display for $name {
         fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
         }
      }
   };
}

config_enum! {
   /// How the database file is opened
   OpenMode, "open mode" {
      /// Read-only; the file must exist
      ReadOnly => "ro",
      /// Read-write; the file must exist
      ReadWrite => "rw",
      /// Read-write, creating the file when missing
      ReadWriteCreate => "rwc",
      /// Private in-memory database
      Memory => "memory",
   }
}

config_enum! {
   /// SQLite `journal_mode` pragma
   JournalMode, "journal mode" {
      Delete => "DELETE",
      Truncate => "TRUNCATE",
      Persist => "PERSIST",
      Memory => "MEMORY",
      Wal => "WAL",
      Off => "OFF",
   }
}

config_enum! {
   /// SQLite `locking_mode` pragma
   LockingMode, "locking mode" {
      Normal => "NORMAL",
      Exclusive => "EXCLUSIVE",
   }
}

config_enum! {
   /// Lock taken by `BEGIN` when a transaction starts
   TransactionLock, "transaction lock" {
      Deferred => "deferred",
      Immediate => "immediate",
      Exclusive => "exclusive",
   }
}

impl OpenMode {
   fn to_native(self, path: &str) -> Result<SqliteConnectOptions> {
      let options = match self {
         OpenMode::Memory => {
            SqliteConnectOptions::from_str(&format!("sqlite:{path}?mode=memory"))?
               .create_if_missing(true)
         }
         OpenMode::ReadOnly => SqliteConnectOptions::new().filename(path).read_only(true),
         OpenMode::ReadWrite => SqliteConnectOptions::new().filename(path),
         OpenMode::ReadWriteCreate => SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true),
      };
      Ok(options)
   }
}

impl JournalMode {
   fn to_native(self) -> SqliteJournalMode {
      match self {
         JournalMode::Delete => SqliteJournalMode::Delete,
         JournalMode::Truncate => SqliteJournalMode::Truncate,
         JournalMode::Persist => SqliteJournalMode::Persist,
         JournalMode::Memory => SqliteJournalMode::Memory,
         JournalMode::Wal => SqliteJournalMode::Wal,
         JournalMode::Off => SqliteJournalMode::Off,
      }
   }
}

impl LockingMode {
   fn to_native(self) -> SqliteLockingMode {
      match self {
         LockingMode::Normal => SqliteLockingMode::Normal,
         LockingMode::Exclusive => SqliteLockingMode::Exclusive,
      }
   }
}

impl TransactionLock {
   /// Statement that opens a transaction with this lock
   pub fn begin_statement(&self) -> &'static str {
      match self {
         TransactionLock::Deferred => "BEGIN DEFERRED",
         TransactionLock::Immediate => "BEGIN IMMEDIATE",
         TransactionLock::Exclusive => "BEGIN EXCLUSIVE",
      }
   }
}

/// SQLite `synchronous` pragma.
///
/// Accepted in configuration either by name (`"NORMAL"`) or by level (`1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "SynchronousRepr")]
pub enum Synchronous {
   Off,
   Normal,
   Full,
   Extra,
}

impl Synchronous {
   /// Numeric level written into connection strings
   pub fn level(&self) -> u8 {
      match self {
         Synchronous::Off => 0,
         Synchronous::Normal => 1,
         Synchronous::Full => 2,
         Synchronous::Extra => 3,
      }
   }

   fn from_level(level: i64) -> Result<Self> {
      match level {
         0 => Ok(Synchronous::Off),
         1 => Ok(Synchronous::Normal),
         2 => Ok(Synchronous::Full),
         3 => Ok(Synchronous::Extra),
         other => Err(Error::Config(format!("unknown synchronous level {other}"))),
      }
   }

   fn to_native(self) -> SqliteSynchronous {
      match self {
         Synchronous::Off => SqliteSynchronous::Off,
         Synchronous::Normal => SqliteSynchronous::Normal,
         Synchronous::Full => SqliteSynchronous::Full,
         Synchronous::Extra => SqliteSynchronous::Extra,
      }
   }
}

impl FromStr for Synchronous {
   type Err = Error;

   fn from_str(s: &str) -> Result<Self> {
      if let Ok(level) = s.trim().parse::<i64>() {
         return Synchronous::from_level(level);
      }
      match s.trim().to_ascii_uppercase().as_str() {
         "OFF" => Ok(Synchronous::Off),
         "NORMAL" => Ok(Synchronous::Normal),
         "FULL" => Ok(Synchronous::Full),
         "EXTRA" => Ok(Synchronous::Extra),
         _ => Err(Error::Config(format!("unknown synchronous level '{s}'"))),
      }
   }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SynchronousRepr {
   Level(i64),
   Name(String),
}

impl TryFrom<SynchronousRepr> for Synchronous {
   type Error = Error;

   fn try_from(repr: SynchronousRepr) -> Result<Self> {
      match repr {
         SynchronousRepr::Level(level) => Synchronous::from_level(level),
         SynchronousRepr::Name(name) => name.parse(),
      }
   }
}

/// Configuration for a single SQLite database handle
///
/// Every optional field falls back to the single-writer defaults when unset:
/// `rwc` mode, `WAL` journal, `NORMAL` sync, `EXCLUSIVE` locking, `immediate`
/// transactions and one open connection.
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_conn_mgr::{JournalMode, SqliteConfig};
///
/// let config = SqliteConfig {
///    path: "app.db".into(),
///    journal_mode: Some(JournalMode::Delete),
///    busy_timeout_ms: 5000,
///    ..Default::default()
/// };
///
/// assert_eq!(
///    config.connection_string().unwrap(),
///    "file:app.db?cache=private&_locking=EXCLUSIVE&_txlock=immediate&_fk=1&mode=rwc&_journal=DELETE&_sync=1&_busy_timeout=5000"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
   /// Path of the database file. Required.
   pub path: String,

   /// Open mode. Default: `rwc`
   pub mode: Option<OpenMode>,

   /// Journal mode. Default: `WAL`
   pub journal_mode: Option<JournalMode>,

   /// Synchronous level. Default: `NORMAL`
   pub synchronous: Option<Synchronous>,

   /// Busy timeout in milliseconds; only applied when positive
   pub busy_timeout_ms: i64,

   /// Locking mode. Default: `EXCLUSIVE`
   pub locking_mode: Option<LockingMode>,

   /// Lock taken when a transaction begins. Default: `immediate`
   pub transaction_lock: Option<TransactionLock>,

   /// Maximum open connections. Zero means one (single writer).
   pub max_open_connections: u32,

   /// Connections kept warm in the pool; only applied when positive
   pub max_idle_connections: u32,

   /// Seconds an idle connection may live; only applied when positive
   pub conn_max_idle_time_secs: u64,

   /// Ping cache window in seconds. Zero uses the 30 second default, negative always pings.
   pub ping_frequency_secs: i64,
}

impl SqliteConfig {
   /// Configuration for the database at `path` with every other field defaulted
   pub fn new(path: impl Into<String>) -> Self {
      Self {
         path: path.into(),
         ..Default::default()
      }
   }

   /// Compose the connection string for this configuration.
   ///
   /// The parameter order and defaults are stable; they decide the on-disk
   /// behavior of the database (journal, locking, sync level).
   pub fn connection_string(&self) -> Result<String> {
      if self.path.trim().is_empty() {
         return Err(Error::Config("database path is empty".into()));
      }
      // '?' starts the parameter list, so it cannot appear in the path
      if self.path.contains('?') {
         return Err(Error::Config(format!("database path contains '?': {}", self.path)));
      }

      let locking = self.locking_mode.unwrap_or(LockingMode::Exclusive);
      let tx_lock = self.transaction_lock.unwrap_or(TransactionLock::Immediate);
      let mode = self.mode.unwrap_or(OpenMode::ReadWriteCreate);
      let journal = self.journal_mode.unwrap_or(JournalMode::Wal);
      let sync = self.synchronous.unwrap_or(Synchronous::Normal);

      let mut dsn = format!(
         "file:{}?cache=private&_locking={}&_txlock={}&_fk=1&mode={}&_journal={}&_sync={}",
         self.path,
         locking,
         tx_lock,
         mode,
         journal,
         sync.level()
      );
      if self.busy_timeout_ms > 0 {
         dsn.push_str(&format!("&_busy_timeout={}", self.busy_timeout_ms));
      }

      Ok(dsn)
   }

   /// Pool sizing derived from this configuration
   pub fn pool_settings(&self) -> PoolSettings {
      let max_connections = self.max_open_connections.max(1);
      PoolSettings {
         max_connections,
         min_connections: (self.max_idle_connections > 0)
            .then(|| self.max_idle_connections.min(max_connections)),
         idle_timeout: (self.conn_max_idle_time_secs > 0)
            .then(|| Duration::from_secs(self.conn_max_idle_time_secs)),
      }
   }
}

/// Pool sizing applied when a handle is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
   pub max_connections: u32,
   pub min_connections: Option<u32>,
   pub idle_timeout: Option<Duration>,
}

impl PoolSettings {
   /// Pool options for these settings.
   ///
   /// Connections are never reaped or recycled unless an idle timeout is set.
   /// Replacing the only connection of an in-memory database would drop its contents.
   pub(crate) fn pool_options(&self) -> SqlitePoolOptions {
      let mut options = SqlitePoolOptions::new()
         .max_connections(self.max_connections)
         .idle_timeout(self.idle_timeout)
         .max_lifetime(None);
      if let Some(min) = self.min_connections {
         options = options.min_connections(min);
      }
      options
   }
}

/// Native connect options and transaction statement recovered from a connection string
#[derive(Debug, Clone)]
pub struct ConnectPlan {
   pub options: SqliteConnectOptions,
   pub transaction_lock: TransactionLock,
}

impl ConnectPlan {
   /// Parse a connection string produced by [`SqliteConfig::connection_string`].
   pub fn parse(connection_string: &str) -> Result<Self> {
      let rest = connection_string
         .strip_prefix("file:")
         .ok_or_else(|| Error::Config(format!("connection string must start with 'file:': {connection_string}")))?;
      let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
      if path.is_empty() {
         return Err(Error::Config("database path is empty".into()));
      }

      let mut mode = OpenMode::ReadWriteCreate;
      let mut shared_cache = false;
      let mut locking = None;
      let mut transaction_lock = TransactionLock::Deferred;
      let mut foreign_keys = None;
      let mut journal = None;
      let mut sync = None;
      let mut busy_timeout = None;

      for pair in query.split('&').filter(|p| !p.is_empty()) {
         let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("malformed connection parameter '{pair}'")))?;
         match key {
            "cache" => {
               shared_cache = match value {
                  "private" => false,
                  "shared" => true,
                  _ => return Err(Error::Config(format!("unknown cache mode '{value}'"))),
               }
            }
            "_locking" => locking = Some(value.parse::<LockingMode>()?),
            "_txlock" => transaction_lock = value.parse()?,
            "_fk" => foreign_keys = Some(parse_flag(key, value)?),
            "mode" => mode = value.parse()?,
            "_journal" => journal = Some(value.parse::<JournalMode>()?),
            "_sync" => sync = Some(value.parse::<Synchronous>()?),
            "_busy_timeout" => {
               let ms = value
                  .parse::<u64>()
                  .map_err(|_| Error::Config(format!("invalid busy timeout '{value}'")))?;
               busy_timeout = Some(Duration::from_millis(ms));
            }
            _ => return Err(Error::Config(format!("unknown connection parameter '{key}'"))),
         }
      }

      let mut options = mode.to_native(path)?.shared_cache(shared_cache);
      if let Some(locking) = locking {
         options = options.locking_mode(locking.to_native());
      }
      if let Some(foreign_keys) = foreign_keys {
         options = options.foreign_keys(foreign_keys);
      }
      if let Some(journal) = journal {
         options = options.journal_mode(journal.to_native());
      }
      if let Some(sync) = sync {
         options = options.synchronous(sync.to_native());
      }
      if let Some(timeout) = busy_timeout {
         options = options.busy_timeout(timeout);
      }

      Ok(Self {
         options,
         transaction_lock,
      })
   }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
   match value {
      "1" | "true" => Ok(true),
      "0" | "false" => Ok(false),
      _ => Err(Error::Config(format!("invalid value '{value}' for {key}"))),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_default_connection_string() {
      let config = SqliteConfig::new("/tmp/app.db");
      assert_eq!(
         config.connection_string().unwrap(),
         "file:/tmp/app.db?cache=private&_locking=EXCLUSIVE&_txlock=immediate&_fk=1&mode=rwc&_journal=WAL&_sync=1"
      );
   }

   #[test]
   fn test_connection_string_overrides() {
      let config = SqliteConfig {
         path: "data.db".into(),
         mode: Some(OpenMode::ReadOnly),
         journal_mode: Some(JournalMode::Truncate),
         synchronous: Some(Synchronous::Full),
         busy_timeout_ms: 250,
         locking_mode: Some(LockingMode::Normal),
         transaction_lock: Some(TransactionLock::Deferred),
         ..Default::default()
      };
      assert_eq!(
         config.connection_string().unwrap(),
         "file:data.db?cache=private&_locking=NORMAL&_txlock=deferred&_fk=1&mode=ro&_journal=TRUNCATE&_sync=2&_busy_timeout=250"
      );
   }

   #[test]
   fn test_busy_timeout_omitted_unless_positive() {
      let config = SqliteConfig {
         busy_timeout_ms: -5,
         ..SqliteConfig::new("x.db")
      };
      assert!(!config.connection_string().unwrap().contains("_busy_timeout"));
   }

   #[test]
   fn test_empty_path_is_config_error() {
      let err = SqliteConfig::new("  ").connection_string().unwrap_err();
      assert!(matches!(err, Error::Config(_)));
   }

   #[test]
   fn test_pool_settings_defaults_to_single_connection() {
      let settings = SqliteConfig::new("x.db").pool_settings();
      assert_eq!(settings.max_connections, 1);
      assert_eq!(settings.min_connections, None);
      assert_eq!(settings.idle_timeout, None);

      let options = settings.pool_options();
      assert_eq!(options.get_max_connections(), 1);
      assert_eq!(options.get_idle_timeout(), None);
      assert_eq!(options.get_max_lifetime(), None);
   }

   #[test]
   fn test_pool_settings_overrides() {
      let config = SqliteConfig {
         max_open_connections: 4,
         max_idle_connections: 10,
         conn_max_idle_time_secs: 90,
         ..SqliteConfig::new("x.db")
      };
      let settings = config.pool_settings();
      assert_eq!(settings.max_connections, 4);
      // Idle connections cannot outnumber open ones
      assert_eq!(settings.min_connections, Some(4));
      assert_eq!(settings.idle_timeout, Some(Duration::from_secs(90)));

      let options = settings.pool_options();
      assert_eq!(options.get_min_connections(), 4);
      assert_eq!(options.get_idle_timeout(), Some(Duration::from_secs(90)));
      assert_eq!(options.get_max_lifetime(), None);
   }

   #[test]
   fn test_path_with_query_separator_is_config_error() {
      let err = SqliteConfig::new("/tmp/what?.db").connection_string().unwrap_err();
      assert!(matches!(err, Error::Config(_)));
   }

   #[test]
   fn test_path_with_ampersand_survives_parse() {
      let dsn = SqliteConfig::new("/tmp/salt&pepper.db").connection_string().unwrap();
      let plan = ConnectPlan::parse(&dsn).unwrap();
      assert_eq!(
         plan.options.get_filename(),
         std::path::Path::new("/tmp/salt&pepper.db")
      );
      assert_eq!(plan.transaction_lock, TransactionLock::Immediate);
   }

   #[test]
   fn test_enum_parsing_is_case_insensitive() {
      assert_eq!("wal".parse::<JournalMode>().unwrap(), JournalMode::Wal);
      assert_eq!("RWC".parse::<OpenMode>().unwrap(), OpenMode::ReadWriteCreate);
      assert_eq!("Exclusive".parse::<LockingMode>().unwrap(), LockingMode::Exclusive);
      assert_eq!("full".parse::<Synchronous>().unwrap(), Synchronous::Full);
      assert_eq!("3".parse::<Synchronous>().unwrap(), Synchronous::Extra);
      assert!("sometimes".parse::<JournalMode>().is_err());
      assert!("7".parse::<Synchronous>().is_err());
   }

   #[test]
   fn test_deserialize_config() {
      let config: SqliteConfig = serde_json::from_str(
         r#"{
            "path": "app.db",
            "mode": "ro",
            "journal_mode": "delete",
            "synchronous": 2,
            "locking_mode": "NORMAL",
            "ping_frequency_secs": -1
         }"#,
      )
      .unwrap();

      assert_eq!(config.path, "app.db");
      assert_eq!(config.mode, Some(OpenMode::ReadOnly));
      assert_eq!(config.journal_mode, Some(JournalMode::Delete));
      assert_eq!(config.synchronous, Some(Synchronous::Full));
      assert_eq!(config.locking_mode, Some(LockingMode::Normal));
      assert_eq!(config.ping_frequency_secs, -1);
      assert_eq!(config.max_open_connections, 0);

      let named: SqliteConfig =
         serde_json::from_str(r#"{"path": "a.db", "synchronous": "extra"}"#).unwrap();
      assert_eq!(named.synchronous, Some(Synchronous::Extra));

      assert!(serde_json::from_str::<SqliteConfig>(r#"{"path": "a.db", "mode": "rwx"}"#).is_err());
   }

   #[test]
   fn test_parse_plan_transaction_lock() {
      let dsn = SqliteConfig::new("x.db").connection_string().unwrap();
      let plan = ConnectPlan::parse(&dsn).unwrap();
      assert_eq!(plan.transaction_lock, TransactionLock::Immediate);
      assert_eq!(plan.transaction_lock.begin_statement(), "BEGIN IMMEDIATE");
   }

   #[test]
   fn test_parse_plan_rejects_unknown_parameters() {
      assert!(matches!(
         ConnectPlan::parse("file:x.db?cache=private&_cipher=aes"),
         Err(Error::Config(_))
      ));
      assert!(matches!(
         ConnectPlan::parse("file:x.db?_busy_timeout"),
         Err(Error::Config(_))
      ));
      assert!(matches!(ConnectPlan::parse("x.db?mode=rw"), Err(Error::Config(_))));
      assert!(matches!(ConnectPlan::parse("file:?mode=rw"), Err(Error::Config(_))));
   }
}
