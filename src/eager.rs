//! A holder whose resource exists before anyone can ask for it.
//!
//! Rust runs no user code before `main`, so "load time" means the
//! composition root: build the [`Eager`] holder during startup and hand out
//! references to it. A failing factory then fails startup, not a later call.

use core::fmt;

use crate::error::{BoxError, ConstructionFailure};
use crate::{Phase, SingletonHolder, Strategy};

/// Holds a resource that was constructed up front.
///
/// Every resource is built even if no caller ever uses it. Treat an `Err`
/// from [`try_new`](Self::try_new) as fatal: there is no per-call recovery.
pub struct Eager<T> {
   resource: T,
}

impl<T> Eager<T> {
   /// Wraps a resource that is already built.
   #[inline]
   pub const fn new(resource: T) -> Self {
      Self { resource }
   }

   /// Runs `factory` immediately and holds its result.
   pub fn try_new<F, E>(factory: F) -> Result<Self, ConstructionFailure>
   where
      F: FnOnce() -> Result<T, E>,
      E: Into<BoxError>,
   {
      tracing::debug!(strategy = %Strategy::Eager, "constructing resource at startup");
      match factory() {
         Ok(resource) => Ok(Self::new(resource)),
         Err(err) => {
            let failure = ConstructionFailure::new(1, err);
            tracing::error!(strategy = %Strategy::Eager, error = %failure.cause(), "startup construction failed");
            Err(failure)
         }
      }
   }

   /// The resource. Never blocks, never fails.
   #[inline]
   pub fn instance(&self) -> &T {
      &self.resource
   }
}

impl<T> SingletonHolder for Eager<T> {
   type Resource = T;

   #[inline]
   fn get_instance(&self) -> Result<&T, ConstructionFailure> {
      Ok(&self.resource)
   }

   fn phase(&self) -> Phase {
      Phase::Initialized
   }

   fn strategy(&self) -> Strategy {
      Strategy::Eager
   }
}

impl<T: fmt::Debug> fmt::Debug for Eager<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_tuple("Eager").field(&self.resource).finish()
   }
}
