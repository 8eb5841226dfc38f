//! The single error kind raised by the holders.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error produced by a resource factory.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The resource factory failed.
///
/// Returned to the thread that ran the failing factory, and cloned to every
/// thread that was blocked on that same construction attempt (see
/// [`is_propagated`](Self::is_propagated)). The holder is left empty, so a
/// later call retries construction.
#[derive(Debug, Clone, Error)]
#[error("resource construction failed (attempt {attempt}): {cause}")]
pub struct ConstructionFailure {
   attempt: u64,
   #[source]
   cause: Arc<dyn StdError + Send + Sync + 'static>,
   propagated: bool,
}

impl ConstructionFailure {
   /// Wraps a factory error raised by construction attempt `attempt`.
   pub(crate) fn new(attempt: u64, cause: impl Into<BoxError>) -> Self {
      Self {
         attempt,
         cause: Arc::from(cause.into()),
         propagated: false,
      }
   }

   /// Failure recorded when an initializer never returned: it panicked, or
   /// its future was dropped.
   pub(crate) fn unfinished(attempt: u64) -> Self {
      Self::new(attempt, "initializer did not run to completion")
   }

   /// Copy handed to a thread that waited on the failing attempt.
   pub(crate) fn propagate(&self) -> Self {
      Self {
         propagated: true,
         ..self.clone()
      }
   }

   /// One-based index of the construction attempt that failed.
   pub fn attempt(&self) -> u64 {
      self.attempt
   }

   /// The factory's own error.
   pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
      &*self.cause
   }

   /// `true` if this thread did not run the factory itself but was waiting
   /// on the attempt that failed.
   pub fn is_propagated(&self) -> bool {
      self.propagated
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[derive(Debug, Error)]
   #[error("disk on fire")]
   struct DiskOnFire;

   #[test]
   fn test_display_includes_attempt_and_cause() {
      let err = ConstructionFailure::new(3, DiskOnFire);
      assert_eq!(
         err.to_string(),
         "resource construction failed (attempt 3): disk on fire"
      );
   }

   #[test]
   fn test_source_is_factory_error() {
      let err = ConstructionFailure::new(1, DiskOnFire);
      let source = err.source().expect("source must be chained");
      assert_eq!(source.to_string(), "disk on fire");
   }

   #[test]
   fn test_propagate_shares_cause() {
      let err = ConstructionFailure::new(2, "boom");
      assert!(!err.is_propagated());

      let seen = err.propagate();
      assert!(seen.is_propagated());
      assert_eq!(seen.attempt(), 2);
      assert_eq!(seen.cause().to_string(), "boom");
      assert!(Arc::ptr_eq(&err.cause, &seen.cause));
   }

   #[test]
   fn test_unfinished() {
      let err = ConstructionFailure::unfinished(7);
      assert_eq!(err.cause().to_string(), "initializer did not run to completion");
      assert_eq!(err.attempt(), 7);
   }
}
