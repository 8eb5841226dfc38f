//! Initialization state machine shared by the run-once holders.
//!
//! The whole state is packed into a single `AtomicU8`:
//! - Bit 0: DONE - a resource has been published
//! - Bit 1: LOCKED - some thread is running the factory
//! - Bit 2: WAITING - at least one thread is parked on the state word
//! - Bits 3-7: EPOCH - bumped every time an attempt ends, successfully or not
//!
//! Readers on the fast path only need an acquire load of the DONE bit.
//! Contended callers park on the address of the state word through
//! `parking_lot_core`, so nobody busy-spins while the factory runs.
//!
//! The epoch identifies a construction attempt. A thread that parks while
//! attempt `e` holds the lock and later wakes to find the state neither DONE
//! nor in epoch `e` knows that attempt was abandoned, and reports it instead
//! of silently starting a new one.

use core::mem;
use core::sync::atomic::{AtomicU8, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

use crate::Phase;

/// Atomic initialization state of a single slot.
#[repr(transparent)]
pub(crate) struct InitState(AtomicU8);

/// Outcome of [`InitState::lock`].
pub(crate) enum Lock<'a> {
   /// The caller owns the attempt and must run the factory.
   Acquired(InitGuard<'a>),
   /// A resource was already published.
   Done,
   /// The caller waited on an attempt that ended without publishing; carries
   /// that attempt's epoch.
   Abandoned(u8),
}

/// Single non-blocking step of the lock protocol.
enum Step<'a> {
   Ready(Lock<'a>),
   /// Held by another thread; carries the state word to park on.
   Busy(u8),
}

impl InitState {
   const DONE: u8 = 1;
   const LOCKED: u8 = 2;
   const WAITING: u8 = 4;
   const EPOCH_1: u8 = 8;
   const EPOCH_MASK: u8 = !(Self::DONE | Self::LOCKED | Self::WAITING);

   /// Number of distinct epochs before the counter wraps.
   pub(crate) const EPOCHS: usize = 32;

   #[inline(always)]
   const fn epoch(state: u8) -> u8 {
      state & Self::EPOCH_MASK
   }

   /// Epoch of `state` as a number in `0..EPOCHS`.
   #[inline(always)]
   const fn epoch_index(state: u8) -> u8 {
      Self::epoch(state) >> 3
   }

   #[inline(always)]
   const fn next_epoch(state: u8) -> u8 {
      Self::epoch(state).wrapping_add(Self::EPOCH_1) & Self::EPOCH_MASK
   }

   /// Uninitialized state.
   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(0))
   }

   /// State of a slot that starts out published.
   #[inline]
   pub(crate) const fn done() -> Self {
      Self(AtomicU8::new(Self::DONE))
   }

   #[inline]
   pub(crate) fn is_done(&self, ordering: Ordering) -> bool {
      self.0.load(ordering) & Self::DONE != 0
   }

   /// Snapshot of the tri-state view. Never blocks.
   pub(crate) fn phase(&self) -> Phase {
      let state = self.0.load(Ordering::Acquire);
      if state & Self::DONE != 0 {
         Phase::Initialized
      } else if state & Self::LOCKED != 0 {
         Phase::Initializing
      } else {
         Phase::Uninitialized
      }
   }

   #[inline]
   fn notify_all(&self) {
      // SAFETY: unpark and park are keyed on the same address, the state word.
      unsafe {
         parking_lot_core::unpark_all(self.0.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks the calling thread until the state word differs from `expected`.
   #[inline]
   fn wait(&self, expected: u8) {
      // SAFETY: see `notify_all`.
      unsafe {
         // Spurious wake-ups are fine, callers re-check in a loop.
         let _ = parking_lot_core::park(
            self.0.as_ptr() as usize,
            || self.0.load(Ordering::Acquire) == expected,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
      }
   }

   /// Publishes: sets DONE, bumps the epoch and wakes waiters.
   ///
   /// The release swap pairs with the acquire loads in `is_done`, so whoever
   /// sees DONE also sees the fully written slot.
   #[inline]
   fn set_done(&self) {
      let current = self.0.load(Ordering::Relaxed);
      let prev = self.0.swap(Self::DONE | Self::next_epoch(current), Ordering::Release);
      if prev & Self::WAITING != 0 {
         self.notify_all();
      }
   }

   /// Abandons the running attempt: clears every flag, bumps the epoch and
   /// wakes waiters so they can observe the failure.
   #[inline]
   fn set_uninit(&self) {
      let current = self.0.load(Ordering::Relaxed);
      let prev = self.0.swap(Self::next_epoch(current), Ordering::Release);
      if prev & Self::WAITING != 0 {
         self.notify_all();
      }
   }

   /// `parked_on` is the epoch of the attempt the caller already parked on,
   /// if any.
   fn lock_step(&self, parked_on: Option<u8>) -> Step<'_> {
      loop {
         let current = self.0.load(Ordering::Acquire);
         if current & Self::DONE != 0 {
            return Step::Ready(Lock::Done);
         }
         // With a 5-bit epoch this misses an abandonment only if 32 attempts
         // start and fail while this thread sleeps.
         if let Some(epoch) = parked_on.filter(|epoch| *epoch != Self::epoch(current)) {
            return Step::Ready(Lock::Abandoned(Self::epoch_index(epoch)));
         }

         if current & Self::LOCKED == 0 {
            match self.0.compare_exchange_weak(
               current,
               current | Self::LOCKED,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => {
                  let guard = InitGuard::new(self, Self::epoch_index(current));
                  return Step::Ready(Lock::Acquired(guard));
               }
               Err(_) => {
                  core::hint::spin_loop();
                  continue;
               }
            }
         }

         if current & Self::WAITING == 0 {
            let flagged = current | Self::WAITING;
            match self.0.compare_exchange_weak(
               current,
               flagged,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Step::Busy(flagged),
               Err(_) => {
                  core::hint::spin_loop();
                  continue;
               }
            }
         }
         return Step::Busy(current);
      }
   }

   /// Takes the initialization lock, parking while another thread holds it.
   pub(crate) fn lock(&self) -> Lock<'_> {
      let mut parked_on = None;
      loop {
         match self.lock_step(parked_on) {
            Step::Ready(outcome) => return outcome,
            Step::Busy(state) => {
               parked_on.get_or_insert(Self::epoch(state));
               tracing::trace!(
                  epoch = Self::epoch_index(state),
                  "parking on in-flight construction"
               );
               self.wait(state);
            }
         }
      }
   }

   /// Async flavour of [`lock`](Self::lock).
   ///
   /// Yields to the scheduler while the holder is busy and, once that stops
   /// paying off, parks through [`wait_async`](Self::wait_async).
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub(crate) async fn lock_async(&self) -> Lock<'_> {
      let mut parked_on = None;
      for _ in 0..16 {
         match self.lock_step(parked_on) {
            Step::Ready(outcome) => return outcome,
            Step::Busy(state) => {
               parked_on.get_or_insert(Self::epoch(state));
               for _ in 0..32 {
                  tokio::task::yield_now().await;
                  if self.0.load(Ordering::Relaxed) != state {
                     break;
                  }
               }
            }
         }
      }

      loop {
         match self.lock_step(parked_on) {
            Step::Ready(outcome) => return outcome,
            Step::Busy(state) => {
               parked_on.get_or_insert(Self::epoch(state));
               self.wait_async(state).await;
            }
         }
      }
   }

   /// Must run on the multi-threaded runtime: `block_in_place` panics on a
   /// current-thread one.
   #[cfg(feature = "async-tokio-mt")]
   async fn wait_async(&self, expected: u8) {
      tokio::task::block_in_place(|| self.wait(expected));
   }

   #[cfg(all(feature = "async-tokio", not(feature = "async-tokio-mt")))]
   async fn wait_async(&self, _expected: u8) {
      tokio::task::yield_now().await;
   }
}

/// Ownership of a running construction attempt.
///
/// Dropping the guard abandons the attempt; [`commit`](Self::commit) publishes.
pub(crate) struct InitGuard<'a> {
   state: &'a InitState,
   epoch: u8,
}

impl<'a> InitGuard<'a> {
   #[inline(always)]
   const fn new(state: &'a InitState, epoch: u8) -> Self {
      Self { state, epoch }
   }

   /// Epoch of this attempt, as reported to its waiters by
   /// [`Lock::Abandoned`].
   #[inline(always)]
   pub(crate) const fn epoch(&self) -> u8 {
      self.epoch
   }

   /// Marks the slot initialized and wakes waiters.
   #[inline(always)]
   pub(crate) fn commit(self) {
      self.state.set_done();
      mem::forget(self);
   }
}

impl Drop for InitGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.state.set_uninit();
   }
}

#[cfg(test)]
mod tests {
   use std::sync::{Arc, Barrier};
   use std::thread;
   use std::time::Duration;

   use super::*;

   #[test]
   fn test_phase_transitions() {
      let state = InitState::new();
      assert_eq!(state.phase(), Phase::Uninitialized);

      let Lock::Acquired(guard) = state.lock() else {
         panic!("fresh state must be lockable");
      };
      assert_eq!(state.phase(), Phase::Initializing);
      guard.commit();
      assert_eq!(state.phase(), Phase::Initialized);
      assert!(matches!(state.lock(), Lock::Done));
   }

   #[test]
   fn test_dropped_guard_resets() {
      let state = InitState::new();
      let Lock::Acquired(guard) = state.lock() else {
         panic!("fresh state must be lockable");
      };
      drop(guard);
      assert_eq!(state.phase(), Phase::Uninitialized);
      // A fresh caller that never parked simply gets the next attempt.
      assert!(matches!(state.lock(), Lock::Acquired(_)));
   }

   #[test]
   fn test_done_state() {
      let state = InitState::done();
      assert!(state.is_done(Ordering::Acquire));
      assert!(matches!(state.lock(), Lock::Done));
   }

   #[test]
   fn test_epoch_wraps() {
      let mut state = 0u8;
      for _ in 0..32 {
         state = InitState::next_epoch(state);
      }
      assert_eq!(state, 0);
   }

   #[test]
   fn test_waiter_sees_abandoned_attempt() {
      let state = Arc::new(InitState::new());
      let barrier = Arc::new(Barrier::new(2));

      let Lock::Acquired(guard) = state.lock() else {
         panic!("fresh state must be lockable");
      };

      let waiter = {
         let state = Arc::clone(&state);
         let barrier = Arc::clone(&barrier);
         thread::spawn(move || {
            barrier.wait();
            let abandoned = match state.lock() {
               Lock::Abandoned(epoch) => Some(epoch),
               _ => None,
            };
            abandoned
         })
      };

      barrier.wait();
      thread::sleep(Duration::from_millis(100));
      drop(guard);

      assert_eq!(waiter.join().unwrap(), Some(0));
      assert_eq!(state.phase(), Phase::Uninitialized);
   }

   #[test]
   fn test_guard_carries_attempt_epoch() {
      let state = InitState::new();
      for expected in 0..3 {
         let Lock::Acquired(guard) = state.lock() else {
            panic!("abandoned state must be lockable");
         };
         assert_eq!(guard.epoch(), expected);
         drop(guard);
      }
   }

   #[test]
   fn test_waiter_sees_published_attempt() {
      let state = Arc::new(InitState::new());
      let Lock::Acquired(guard) = state.lock() else {
         panic!("fresh state must be lockable");
      };

      let waiter = {
         let state = Arc::clone(&state);
         thread::spawn(move || matches!(state.lock(), Lock::Done))
      };

      thread::sleep(Duration::from_millis(30));
      guard.commit();
      assert!(waiter.join().unwrap());
   }
}
