//! The nested holder idiom.
//!
//! The outer [`LazyHolder`] never checks or locks anything itself. It only
//! touches its nested [`ResourceHolder`], whose first touch is what builds the
//! resource. Rust has no fallible, generic, runtime-provided "initialize this
//! type on first use" hook, so the nested holder's one-time initialization
//! is the run-once primitive [`Once`]: in effect the same machinery that backs
//! [`AtomicOnce`](crate::AtomicOnce).

use core::fmt;

use crate::error::{BoxError, ConstructionFailure};
use crate::once::Once;
use crate::{Phase, SingletonHolder, Strategy};

/// Builds its resource on first access through a nested holder.
pub struct LazyHolder<T, F> {
   holder: ResourceHolder<T>,
   factory: F,
}

/// Owns the slot. Initialized the first time [`resource`](Self::resource)
/// is reached.
struct ResourceHolder<T> {
   resource: Once<T>,
}

impl<T> ResourceHolder<T> {
   const fn new() -> Self {
      Self {
         resource: Once::new(),
      }
   }

   #[inline]
   fn resource<F, E>(&self, factory: &F) -> Result<&T, ConstructionFailure>
   where
      F: Fn() -> Result<T, E>,
      E: Into<BoxError>,
   {
      self.resource.get_or_try_init(factory)
   }
}

impl<T, F> LazyHolder<T, F> {
   /// Stores `factory`; nothing is built until the first access.
   #[inline]
   pub const fn new(factory: F) -> Self {
      Self {
         holder: ResourceHolder::new(),
         factory,
      }
   }

   /// The resource if it has been built. Never blocks, never constructs.
   #[inline]
   pub fn get(&self) -> Option<&T> {
      self.holder.resource.get()
   }
}

impl<T, F, E> SingletonHolder for LazyHolder<T, F>
where
   F: Fn() -> Result<T, E>,
   E: Into<BoxError>,
{
   type Resource = T;

   #[inline]
   fn get_instance(&self) -> Result<&T, ConstructionFailure> {
      self.holder.resource(&self.factory)
   }

   fn phase(&self) -> Phase {
      self.holder.resource.phase()
   }

   fn strategy(&self) -> Strategy {
      Strategy::Holder
   }
}

impl<T: fmt::Debug, F> fmt::Debug for LazyHolder<T, F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("LazyHolder")
         .field("resource", &self.holder.resource)
         .finish_non_exhaustive()
   }
}
