//! The crate's run-once primitive.
//!
//! [`Once<T>`] is a slot that is written at most once per successful
//! construction. The fast path is a single acquire load; the slow path takes
//! the lock in the shared `InitState` word and parks contended
//! callers instead of spinning.
//!
//! A failing initializer leaves the slot empty. The thread that ran it gets
//! the [`ConstructionFailure`]; threads that were parked on that same attempt
//! get a propagated copy of it. The next fresh caller retries.
//!
//! Failures are recorded per state epoch, so a waiter reports the attempt it
//! actually waited on even if newer attempts have ended since.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU64, Ordering};
use core::{fmt, mem};

#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
use core::future::Future;

use parking_lot::Mutex;

use crate::error::{BoxError, ConstructionFailure};
use crate::state::{InitGuard, InitState, Lock};
use crate::Phase;

/// A thread-safe cell which is initialized at most once.
pub struct Once<T> {
   value: UnsafeCell<mem::MaybeUninit<T>>,
   state: InitState,
   attempts: AtomicU64,
   /// Failure of the last attempt that ran in each epoch.
   failures: Mutex<[Option<ConstructionFailure>; InitState::EPOCHS]>,
}

const NO_FAILURE: Option<ConstructionFailure> = None;

impl<T> Once<T> {
   /// Creates a new, uninitialized cell.
   #[inline]
   #[must_use]
   pub const fn new() -> Self {
      Self {
         value: UnsafeCell::new(mem::MaybeUninit::uninit()),
         state: InitState::new(),
         attempts: AtomicU64::new(0),
         failures: Mutex::new([NO_FAILURE; InitState::EPOCHS]),
      }
   }

   /// Creates a cell that is already initialized with `value`.
   #[inline]
   #[must_use]
   pub const fn with_value(value: T) -> Self {
      Self {
         value: UnsafeCell::new(mem::MaybeUninit::new(value)),
         state: InitState::done(),
         attempts: AtomicU64::new(0),
         failures: Mutex::new([NO_FAILURE; InitState::EPOCHS]),
      }
   }

   /// Checks if a value has been published. Never blocks.
   #[inline]
   pub fn is_done(&self) -> bool {
      self.state.is_done(Ordering::Acquire)
   }

   /// Current phase of the cell. Never blocks.
   #[inline]
   pub fn phase(&self) -> Phase {
      self.state.phase()
   }

   /// Number of times an initializer has been started on this cell.
   #[inline]
   pub fn attempts(&self) -> u64 {
      self.attempts.load(Ordering::Relaxed)
   }

   /// Returns the value if it has been published. Never blocks.
   #[inline]
   pub fn get(&self) -> Option<&T> {
      if self.is_done() {
         // SAFETY: DONE was observed with acquire ordering, the value is written.
         Some(unsafe { self.get_unchecked() })
      } else {
         None
      }
   }

   /// # Safety
   ///
   /// The cell must be initialized.
   #[inline]
   unsafe fn get_unchecked(&self) -> &T {
      debug_assert!(self.is_done(), "get_unchecked called on uninitialized Once");
      (*self.value.get()).assume_init_ref()
   }

   /// Gets the value, initializing it with an infallible `f` if needed.
   ///
   /// Blocks while another thread runs its initializer. If that initializer
   /// fails, the failure is returned here as well.
   pub fn get_or_init<F>(&self, f: F) -> Result<&T, ConstructionFailure>
   where
      F: FnOnce() -> T,
   {
      self.get_or_try_init(|| Ok::<_, BoxError>(f()))
   }

   /// Gets the value, initializing it with a fallible `f` if needed.
   ///
   /// - If initialized, returns `Ok(&value)` without touching the lock.
   /// - If uninitialized, runs `f` on exactly one thread. On `Ok` the value is
   ///   published to every caller; on `Err` the cell stays empty and every
   ///   thread waiting on this attempt receives the failure.
   pub fn get_or_try_init<F, E>(&self, f: F) -> Result<&T, ConstructionFailure>
   where
      F: FnOnce() -> Result<T, E>,
      E: Into<BoxError>,
   {
      if let Some(value) = self.get() {
         return Ok(value);
      }
      self.try_initialize(f)?;
      // SAFETY: try_initialize returned Ok, so the value is published.
      Ok(unsafe { self.get_unchecked() })
   }

   /// Async version of [`get_or_try_init`](Self::get_or_try_init).
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn get_or_try_init_async<F, Fut, E>(&self, f: F) -> Result<&T, ConstructionFailure>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Result<T, E>>,
      E: Into<BoxError>,
   {
      if let Some(value) = self.get() {
         return Ok(value);
      }
      self.try_initialize_async(f).await?;
      // SAFETY: try_initialize_async returned Ok, so the value is published.
      Ok(unsafe { self.get_unchecked() })
   }

   #[cold]
   fn try_initialize<F, E>(&self, f: F) -> Result<(), ConstructionFailure>
   where
      F: FnOnce() -> Result<T, E>,
      E: Into<BoxError>,
   {
      match self.state.lock() {
         Lock::Done => Ok(()),
         Lock::Abandoned(epoch) => Err(self.propagated_failure(epoch)),
         Lock::Acquired(guard) => {
            let attempt = Attempt::begin(self, guard);
            let result = f();
            attempt.finish(result)
         }
      }
   }

   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[cold]
   async fn try_initialize_async<F, Fut, E>(&self, f: F) -> Result<(), ConstructionFailure>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Result<T, E>>,
      E: Into<BoxError>,
   {
      match self.state.lock_async().await {
         Lock::Done => Ok(()),
         Lock::Abandoned(epoch) => Err(self.propagated_failure(epoch)),
         Lock::Acquired(guard) => {
            // Dropping the future mid-way drops `attempt`, which abandons it.
            let attempt = Attempt::begin(self, guard);
            let result = f().await;
            attempt.finish(result)
         }
      }
   }

   /// Failure of the attempt that ran in `epoch`, as seen by its waiters.
   fn propagated_failure(&self, epoch: u8) -> ConstructionFailure {
      match &self.failures.lock()[usize::from(epoch)] {
         Some(failure) => failure.propagate(),
         None => ConstructionFailure::unfinished(self.attempts()).propagate(),
      }
   }

   fn record_failure(&self, epoch: u8, failure: ConstructionFailure) {
      self.failures.lock()[usize::from(epoch)] = Some(failure);
   }
}

/// A running construction attempt on a [`Once`].
///
/// Records the failure *before* the guard is released so that woken waiters
/// always find it. If the initializer never returns, `Drop` records that.
struct Attempt<'a, T> {
   once: &'a Once<T>,
   guard: Option<InitGuard<'a>>,
   number: u64,
}

impl<'a, T> Attempt<'a, T> {
   fn begin(once: &'a Once<T>, guard: InitGuard<'a>) -> Self {
      let number = once.attempts.fetch_add(1, Ordering::Relaxed) + 1;
      tracing::debug!(attempt = number, "running initializer");
      Self {
         once,
         guard: Some(guard),
         number,
      }
   }

   fn finish<E: Into<BoxError>>(mut self, result: Result<T, E>) -> Result<(), ConstructionFailure> {
      let guard = self.guard.take();
      match result {
         Ok(value) => {
            // SAFETY: we hold the lock, nobody else reads or writes the slot.
            unsafe { (*self.once.value.get()).write(value) };
            if let Some(guard) = guard {
               guard.commit();
            }
            tracing::debug!(attempt = self.number, "resource published");
            Ok(())
         }
         Err(err) => {
            let failure = ConstructionFailure::new(self.number, err);
            tracing::warn!(attempt = self.number, error = %failure.cause(), "initializer failed");
            if let Some(guard) = guard {
               self.once.record_failure(guard.epoch(), failure.clone());
               drop(guard);
            }
            Err(failure)
         }
      }
   }
}

impl<T> Drop for Attempt<'_, T> {
   fn drop(&mut self) {
      if let Some(guard) = self.guard.take() {
         tracing::warn!(attempt = self.number, "initializer did not complete");
         let failure = ConstructionFailure::unfinished(self.number);
         self.once.record_failure(guard.epoch(), failure);
         drop(guard);
      }
   }
}

// SAFETY: the slot is written once under the lock and only read after DONE is
// observed with acquire ordering. Readers on any thread get `&T` (needs
// `T: Sync`); the value may be dropped on another thread (needs `T: Send`).
unsafe impl<T: Sync + Send> Sync for Once<T> {}
// SAFETY: moving the cell moves ownership of `T`.
unsafe impl<T: Send> Send for Once<T> {}

impl<T> Default for Once<T> {
   #[inline]
   fn default() -> Self {
      Self::new()
   }
}

impl<T> From<T> for Once<T> {
   #[inline]
   fn from(value: T) -> Self {
      Self::with_value(value)
   }
}

impl<T: fmt::Debug> fmt::Debug for Once<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_tuple("Once");
      match self.get() {
         Some(v) => d.field(v),
         None => d.field(&format_args!("<{}>", self.phase())),
      };
      d.finish()
   }
}

impl<T> Drop for Once<T> {
   #[inline]
   fn drop(&mut self) {
      if self.is_done() {
         // SAFETY: exclusive access, initialized, never read again.
         unsafe { self.value.get_mut().assume_init_drop() };
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn run_attempt(once: &Once<u32>, result: Result<u32, &'static str>) -> u8 {
      let Lock::Acquired(guard) = once.state.lock() else {
         panic!("cell must be lockable");
      };
      let epoch = guard.epoch();
      let _ = Attempt::begin(once, guard).finish(result);
      epoch
   }

   #[test]
   fn test_waiter_reports_the_attempt_it_waited_on() {
      let once: Once<u32> = Once::new();
      let first = run_attempt(&once, Err("first"));
      let second = run_attempt(&once, Err("second"));
      assert_ne!(first, second);

      // Newer attempts end before the waiter of `first` gets to look.
      let seen = once.propagated_failure(first);
      assert!(seen.is_propagated());
      assert_eq!(seen.attempt(), 1);
      assert_eq!(seen.cause().to_string(), "first");

      run_attempt(&once, Ok(5));
      assert_eq!(once.get(), Some(&5));

      let seen = once.propagated_failure(second);
      assert_eq!(seen.attempt(), 2);
      assert_eq!(seen.cause().to_string(), "second");
   }

   #[test]
   fn test_unfinished_attempt_is_recorded_in_its_epoch() {
      let once: Once<u32> = Once::new();
      let Lock::Acquired(guard) = once.state.lock() else {
         panic!("cell must be lockable");
      };
      let epoch = guard.epoch();
      drop(Attempt::begin(&once, guard));

      let seen = once.propagated_failure(epoch);
      assert_eq!(seen.attempt(), 1);
      assert_eq!(seen.cause().to_string(), "initializer did not run to completion");
   }
}
