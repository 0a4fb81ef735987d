//! Cancellation and deadlines for individual operations

use std::future::{Future, pending};
use std::io;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

use crate::{Error, Result};

/// Carries an optional deadline and an optional cancellation signal into an operation.
///
/// When either fires first, the in-flight database call is abandoned and the
/// operation fails with [`Error::Native`] wrapping an I/O error of kind
/// `TimedOut` or `Interrupted`.
#[derive(Debug, Clone, Default)]
pub struct Context {
   deadline: Option<Instant>,
   cancel: Option<watch::Receiver<bool>>,
}

/// Fires the cancellation of every [`Context`] derived from [`Context::with_cancel`].
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
   pub fn cancel(&self) {
      self.0.send_replace(true);
   }
}

impl Context {
   /// A context that never expires and cannot be cancelled
   pub fn background() -> Self {
      Self::default()
   }

   pub fn with_timeout(timeout: Duration) -> Self {
      Self::with_deadline(Instant::now() + timeout)
   }

   pub fn with_deadline(deadline: Instant) -> Self {
      Self {
         deadline: Some(deadline),
         cancel: None,
      }
   }

   /// A cancellable context with no deadline
   pub fn with_cancel() -> (Self, CancelHandle) {
      Self::background().cancellable()
   }

   /// Add a cancellation signal to this context, keeping its deadline
   pub fn cancellable(self) -> (Self, CancelHandle) {
      let (tx, rx) = watch::channel(false);
      let ctx = Self {
         deadline: self.deadline,
         cancel: Some(rx),
      };
      (ctx, CancelHandle(tx))
   }

   pub fn deadline(&self) -> Option<Instant> {
      self.deadline
   }

   pub fn is_cancelled(&self) -> bool {
      self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
   }

   /// Drive `op` until it completes, the deadline passes, or the context is cancelled.
   pub(crate) async fn run<T, F>(&self, operation: &'static str, op: F) -> Result<T>
   where
      F: Future<Output = Result<T>>,
   {
      let expired = async {
         match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending::<()>().await,
         }
      };

      let cancelled = async {
         match self.cancel.clone() {
            Some(mut rx) => {
               let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
               // A dropped handle can no longer cancel
               if !fired {
                  pending::<()>().await;
               }
            }
            None => pending::<()>().await,
         }
      };

      tokio::select! {
         biased;
         _ = cancelled => Err(Error::Native {
            operation,
            source: sqlx::Error::Io(io::Error::new(io::ErrorKind::Interrupted, "context canceled")),
         }),
         _ = expired => Err(Error::Native {
            operation,
            source: sqlx::Error::Io(io::Error::new(io::ErrorKind::TimedOut, "context deadline exceeded")),
         }),
         result = op => result,
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn io_kind(err: &Error) -> Option<io::ErrorKind> {
      match err.as_native() {
         Some(sqlx::Error::Io(e)) => Some(e.kind()),
         _ => None,
      }
   }

   #[tokio::test]
   async fn test_background_runs_to_completion() {
      let ctx = Context::background();
      let value = ctx.run("test", async { Ok(7) }).await.unwrap();
      assert_eq!(value, 7);
   }

   #[tokio::test]
   async fn test_deadline_aborts_operation() {
      let ctx = Context::with_timeout(Duration::from_millis(20));
      let err = ctx
         .run("slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
         })
         .await
         .unwrap_err();

      assert_eq!(io_kind(&err), Some(io::ErrorKind::TimedOut));
      assert!(err.to_string().starts_with("slow: "));
   }

   #[tokio::test]
   async fn test_cancel_aborts_operation() {
      let (ctx, handle) = Context::with_cancel();
      assert!(!ctx.is_cancelled());

      let task = {
         let ctx = ctx.clone();
         tokio::spawn(async move {
            ctx.run("wait", async {
               tokio::time::sleep(Duration::from_secs(5)).await;
               Ok(())
            })
            .await
         })
      };

      handle.cancel();
      let err = task.await.unwrap().unwrap_err();
      assert_eq!(io_kind(&err), Some(io::ErrorKind::Interrupted));
      assert!(ctx.is_cancelled());
   }

   #[tokio::test]
   async fn test_dropped_cancel_handle_does_not_cancel() {
      let (ctx, handle) = Context::with_cancel();
      drop(handle);
      let value = ctx.run("test", async { Ok("done") }).await.unwrap();
      assert_eq!(value, "done");
   }

   #[tokio::test]
   async fn test_cancellable_keeps_deadline() {
      let ctx = Context::with_timeout(Duration::from_secs(60));
      let deadline = ctx.deadline();
      let (ctx, _handle) = ctx.cancellable();
      assert_eq!(ctx.deadline(), deadline);
   }
}
