//! Double-checked locking over an acquire/release slot.
//!
//! The slot is an [`AtomicPtr`] to a boxed resource. Every read of it is an
//! acquire load and the single publishing write is a release store, so a
//! thread that sees a non-null pointer also sees the resource behind it
//! fully written. A plain load or store here would let a fast-path reader
//! observe a pointer to a half-built value.
//!
//! `get_instance`:
//! 1. acquire-load the slot; non-null means done, no lock taken;
//! 2. take this holder's mutex;
//! 3. acquire-load the slot again, someone may have finished meanwhile;
//! 4. run the factory and release-store the boxed result;
//! 5. drop the mutex.
//!
//! On failure the slot stays null. Threads that queued on the mutex behind a
//! failing attempt get that failure; later callers retry. A factory that
//! panics counts as a failed attempt for the threads queued behind it.

use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{BoxError, ConstructionFailure};
use crate::{Phase, SingletonHolder, Strategy};

/// Builds its resource on first access with double-checked locking.
pub struct DoubleChecked<T, F> {
   slot: AtomicPtr<T>,
   /// Attempts started so far.
   started: AtomicU64,
   /// Failed attempts so far. Readable without the mutex.
   failures: AtomicU64,
   /// Serializes construction and holds the failure of the last attempt.
   construction: Mutex<Option<ConstructionFailure>>,
   factory: F,
   _owns: PhantomData<Box<T>>,
}

impl<T, F> DoubleChecked<T, F> {
   /// Stores `factory`; nothing is built until the first access.
   pub const fn new(factory: F) -> Self {
      Self {
         slot: AtomicPtr::new(ptr::null_mut()),
         started: AtomicU64::new(0),
         failures: AtomicU64::new(0),
         construction: Mutex::new(None),
         factory,
         _owns: PhantomData,
      }
   }

   /// The resource if it has been published. Never blocks, never constructs.
   #[inline]
   pub fn get(&self) -> Option<&T> {
      let resource = self.slot.load(Ordering::Acquire);
      // SAFETY: a non-null slot was release-stored from `Box::into_raw` and is
      // never freed before `self` is dropped.
      unsafe { resource.as_ref() }
   }

   /// Number of times the factory has been started. Never blocks.
   pub fn attempts(&self) -> u64 {
      self.started.load(Ordering::Relaxed)
   }

   /// Snapshot of the initialization phase. Never blocks.
   pub fn phase(&self) -> Phase {
      if !self.slot.load(Ordering::Acquire).is_null() {
         Phase::Initialized
      } else if self.construction.is_locked() {
         Phase::Initializing
      } else {
         Phase::Uninitialized
      }
   }
}

impl<T, F, E> DoubleChecked<T, F>
where
   F: Fn() -> Result<T, E>,
   E: Into<BoxError>,
{
   #[cold]
   fn get_or_construct(&self) -> Result<&T, ConstructionFailure> {
      let failures_seen = self.failures.load(Ordering::Acquire);
      let mut last_failure = self.construction.lock();

      if let Some(resource) = self.get() {
         return Ok(resource);
      }
      if self.failures.load(Ordering::Relaxed) != failures_seen {
         // An attempt we were queued behind failed.
         if let Some(failure) = &*last_failure {
            return Err(failure.propagate());
         }
      }

      let attempt = Construction::begin(self, &mut *last_failure);
      let result = (self.factory)();
      attempt.finish(result)
   }
}

/// A factory call in progress, run with the holder's mutex held.
///
/// If the factory unwinds, `Drop` records the attempt as failed so the
/// threads queued on the mutex report it instead of calling the factory again.
struct Construction<'a, 'g, T, F> {
   holder: &'a DoubleChecked<T, F>,
   last_failure: &'g mut Option<ConstructionFailure>,
   number: u64,
   running: bool,
}

impl<'a, 'g, T, F> Construction<'a, 'g, T, F> {
   fn begin(
      holder: &'a DoubleChecked<T, F>,
      last_failure: &'g mut Option<ConstructionFailure>,
   ) -> Self {
      let number = holder.started.fetch_add(1, Ordering::Relaxed) + 1;
      tracing::debug!(strategy = %Strategy::DoubleChecked, attempt = number, "running factory");
      Self {
         holder,
         last_failure,
         number,
         running: true,
      }
   }

   fn fail(&mut self, failure: ConstructionFailure) {
      *self.last_failure = Some(failure);
      self.holder.failures.fetch_add(1, Ordering::Release);
   }

   fn finish<E>(mut self, result: Result<T, E>) -> Result<&'a T, ConstructionFailure>
   where
      E: Into<BoxError>,
   {
      self.running = false;
      match result {
         Ok(resource) => {
            let resource = Box::into_raw(Box::new(resource));
            self.holder.slot.store(resource, Ordering::Release);
            *self.last_failure = None;
            tracing::debug!(
               strategy = %Strategy::DoubleChecked,
               attempt = self.number,
               "resource published"
            );
            // SAFETY: just published, owned by the holder from now on.
            Ok(unsafe { &*resource })
         }
         Err(err) => {
            let failure = ConstructionFailure::new(self.number, err);
            tracing::warn!(
               strategy = %Strategy::DoubleChecked,
               attempt = self.number,
               error = %failure.cause(),
               "factory failed"
            );
            self.fail(failure.clone());
            Err(failure)
         }
      }
   }
}

impl<T, F> Drop for Construction<'_, '_, T, F> {
   fn drop(&mut self) {
      if self.running {
         tracing::warn!(
            strategy = %Strategy::DoubleChecked,
            attempt = self.number,
            "factory did not complete"
         );
         self.fail(ConstructionFailure::unfinished(self.number));
      }
   }
}

impl<T, F, E> SingletonHolder for DoubleChecked<T, F>
where
   F: Fn() -> Result<T, E>,
   E: Into<BoxError>,
{
   type Resource = T;

   #[inline]
   fn get_instance(&self) -> Result<&T, ConstructionFailure> {
      match self.get() {
         Some(resource) => Ok(resource),
         None => self.get_or_construct(),
      }
   }

   fn phase(&self) -> Phase {
      DoubleChecked::phase(self)
   }

   fn strategy(&self) -> Strategy {
      Strategy::DoubleChecked
   }
}

impl<T, F> Drop for DoubleChecked<T, F> {
   fn drop(&mut self) {
      let resource = *self.slot.get_mut();
      if !resource.is_null() {
         // SAFETY: came from `Box::into_raw`, and `&mut self` means no
         // outstanding borrows.
         drop(unsafe { Box::from_raw(resource) });
      }
   }
}

// SAFETY: the resource is written once under the mutex and published with a
// release store; shared callers only get `&T` (needs `T: Sync`) and it may be
// built on one thread and dropped on another (needs `T: Send`). The factory is
// called through `&F` from any thread.
unsafe impl<T: Send + Sync, F: Sync> Sync for DoubleChecked<T, F> {}

impl<T: fmt::Debug, F> fmt::Debug for DoubleChecked<T, F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_tuple("DoubleChecked");
      match self.get() {
         Some(v) => d.field(v),
         None => d.field(&format_args!("<{}>", self.phase())),
      };
      d.finish()
   }
}
