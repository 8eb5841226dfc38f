//! A holder that hands the whole check/lock/publish protocol to [`Once`].
//!
//! Harder to get wrong than [`DoubleChecked`](crate::DoubleChecked): the only
//! code here is "ask the primitive". Contended callers park until the single
//! in-flight construction finishes; nobody busy-spins.

use core::fmt;

#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
use core::future::Future;

use crate::error::{BoxError, ConstructionFailure};
use crate::once::Once;
use crate::{Phase, SingletonHolder, Strategy};

/// Builds its resource on first access through the run-once primitive.
///
/// The factory can also produce a future; see
/// [`get_instance_async`](Self::get_instance_async).
pub struct AtomicOnce<T, F> {
   cell: Once<T>,
   factory: F,
}

impl<T, F> AtomicOnce<T, F> {
   /// Stores `factory`; nothing is built until the first access.
   #[inline]
   pub const fn new(factory: F) -> Self {
      Self {
         cell: Once::new(),
         factory,
      }
   }

   /// The resource if it has been built. Never blocks, never constructs.
   #[inline]
   pub fn get(&self) -> Option<&T> {
      self.cell.get()
   }

   /// Number of times the factory has been started.
   #[inline]
   pub fn attempts(&self) -> u64 {
      self.cell.attempts()
   }

   /// Async access for a factory that returns a future.
   ///
   /// Same guarantees as [`SingletonHolder::get_instance`]. While another
   /// task constructs, this one yields and eventually parks, which needs the
   /// multi-threaded runtime when the `async-tokio-mt` feature is on.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn get_instance_async<Fut, E>(&self) -> Result<&T, ConstructionFailure>
   where
      F: Fn() -> Fut,
      Fut: Future<Output = Result<T, E>>,
      E: Into<BoxError>,
   {
      self.cell.get_or_try_init_async(&self.factory).await
   }

   /// Phase of the underlying cell, usable with async factories too.
   #[inline]
   pub fn phase(&self) -> Phase {
      self.cell.phase()
   }
}

impl<T, F, E> SingletonHolder for AtomicOnce<T, F>
where
   F: Fn() -> Result<T, E>,
   E: Into<BoxError>,
{
   type Resource = T;

   #[inline]
   fn get_instance(&self) -> Result<&T, ConstructionFailure> {
      self.cell.get_or_try_init(&self.factory)
   }

   fn phase(&self) -> Phase {
      self.cell.phase()
   }

   fn strategy(&self) -> Strategy {
      Strategy::AtomicOnce
   }
}

impl<T: fmt::Debug, F> fmt::Debug for AtomicOnce<T, F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("AtomicOnce")
         .field("cell", &self.cell)
         .field("attempts", &self.attempts())
         .finish_non_exhaustive()
   }
}
