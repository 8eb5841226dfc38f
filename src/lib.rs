//! Safe shared access to one expensive-to-build resource.
//!
//! The crate offers four interchangeable ways of holding a single instance of
//! a resource that many threads want to read:
//!
//! - [`Eager<T>`]: built by the composition root before anyone can ask for it.
//! - [`LazyHolder<T, F>`]: built on first access by a nested holder whose
//!   first-touch initialization is serialized by the run-once primitive.
//! - [`DoubleChecked<T, F>`]: built on first access with a hand-rolled
//!   check/lock/check/publish sequence over an acquire/release slot.
//! - [`AtomicOnce<T, F>`]: built on first access by the run-once primitive
//!   [`Once<T>`], which also supports async factories.
//!
//! All four implement [`SingletonHolder`], and [`LazySingletonHolder`] wraps
//! them into one type so the strategy can be picked at runtime.
//!
//! Every lazy holder retries after a failed construction: the thread that ran
//! the failing factory, and every thread blocked on that attempt, get a
//! [`ConstructionFailure`]; the next call tries again.
//!
//! # Examples
//!
//! ```rust
//! use std::convert::Infallible;
//! use lazy_holder::{DoubleChecked, SingletonHolder};
//!
//! static REGISTRY: DoubleChecked<Vec<&str>, fn() -> Result<Vec<&'static str>, Infallible>> =
//!    DoubleChecked::new(|| Ok(vec!["alpha", "beta"]));
//!
//! let first = REGISTRY.get_instance().unwrap();
//! let again = REGISTRY.get_instance().unwrap();
//! assert!(std::ptr::eq(first, again));
//! ```
//!
//! Picking the strategy by value:
//!
//! ```rust
//! use std::convert::Infallible;
//! use lazy_holder::{LazySingletonHolder, SingletonHolder, Strategy};
//!
//! let holder = LazySingletonHolder::new(Strategy::AtomicOnce, || {
//!    Ok::<_, Infallible>(String::from("expensive"))
//! })
//! .unwrap();
//! assert!(!holder.is_initialized());
//! assert_eq!(holder.get_instance().unwrap(), "expensive");
//! ```

use core::fmt;
use core::str::FromStr;

/// Run-once holder with async support.
mod atomic_once;

/// Hand-rolled double-checked locking.
mod double_checked;

/// Construction before first use.
mod eager;

/// The single error kind.
mod error;

/// Nested holder idiom.
mod holder;

/// Run-once primitive.
mod once;

/// Internal synchronization state management.
mod state;

pub use atomic_once::AtomicOnce;
pub use double_checked::DoubleChecked;
pub use eager::Eager;
pub use error::{BoxError, ConstructionFailure};
pub use holder::LazyHolder;
pub use once::Once;

/// The contract shared by every strategy.
///
/// Implementations guarantee that all successful calls on one holder return
/// the same reference, that the factory runs at most once per successful
/// construction, and that no caller ever sees a partially built resource.
pub trait SingletonHolder {
   /// The shared resource.
   type Resource;

   /// Returns the shared instance, constructing it first if this strategy is
   /// lazy and nobody has done so yet.
   fn get_instance(&self) -> Result<&Self::Resource, ConstructionFailure>;

   /// Snapshot of the initialization phase. Never blocks.
   fn phase(&self) -> Phase;

   /// Which strategy this holder uses.
   fn strategy(&self) -> Strategy;

   /// `true` once a resource has been published.
   fn is_initialized(&self) -> bool {
      self.phase() == Phase::Initialized
   }
}

/// Initialization phase of a holder.
///
/// Moves `Uninitialized -> Initializing -> Initialized` at most once per
/// successful construction. A failed attempt moves back to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
   Uninitialized,
   Initializing,
   Initialized,
}

impl fmt::Display for Phase {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         Phase::Uninitialized => "uninitialized",
         Phase::Initializing => "initializing",
         Phase::Initialized => "initialized",
      })
   }
}

/// The four initialization strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
   Eager,
   Holder,
   DoubleChecked,
   AtomicOnce,
}

impl Strategy {
   /// Every strategy, eager first.
   pub const ALL: [Strategy; 4] = [
      Strategy::Eager,
      Strategy::Holder,
      Strategy::DoubleChecked,
      Strategy::AtomicOnce,
   ];

   /// Name accepted by [`FromStr`].
   pub const fn name(self) -> &'static str {
      match self {
         Strategy::Eager => "eager",
         Strategy::Holder => "holder",
         Strategy::DoubleChecked => "double-checked",
         Strategy::AtomicOnce => "atomic-once",
      }
   }

   /// `false` only for [`Strategy::Eager`].
   pub const fn is_lazy(self) -> bool {
      !matches!(self, Strategy::Eager)
   }
}

impl fmt::Display for Strategy {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.name())
   }
}

/// Error returned when parsing an unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy `{0}`, expected one of: eager, holder, double-checked, atomic-once")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
   type Err = UnknownStrategy;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      Strategy::ALL
         .into_iter()
         .find(|strategy| strategy.name().eq_ignore_ascii_case(s.trim()))
         .ok_or_else(|| UnknownStrategy(s.to_owned()))
   }
}

/// One holder, any strategy.
///
/// Built with [`LazySingletonHolder::new`]; every call is forwarded to the
/// wrapped strategy.
pub enum LazySingletonHolder<T, F> {
   Eager(Eager<T>),
   Holder(LazyHolder<T, F>),
   DoubleChecked(DoubleChecked<T, F>),
   AtomicOnce(AtomicOnce<T, F>),
}

impl<T, F, E> LazySingletonHolder<T, F>
where
   F: Fn() -> Result<T, E>,
   E: Into<BoxError>,
{
   /// Builds a holder using `strategy`.
   ///
   /// For [`Strategy::Eager`] the factory runs right here and its failure is
   /// returned; the lazy strategies only store the factory and always succeed.
   pub fn new(strategy: Strategy, factory: F) -> Result<Self, ConstructionFailure> {
      Ok(match strategy {
         Strategy::Eager => Self::Eager(Eager::try_new(factory)?),
         Strategy::Holder => Self::Holder(LazyHolder::new(factory)),
         Strategy::DoubleChecked => Self::DoubleChecked(DoubleChecked::new(factory)),
         Strategy::AtomicOnce => Self::AtomicOnce(AtomicOnce::new(factory)),
      })
   }
}

impl<T, F, E> SingletonHolder for LazySingletonHolder<T, F>
where
   F: Fn() -> Result<T, E>,
   E: Into<BoxError>,
{
   type Resource = T;

   fn get_instance(&self) -> Result<&T, ConstructionFailure> {
      match self {
         Self::Eager(holder) => holder.get_instance(),
         Self::Holder(holder) => holder.get_instance(),
         Self::DoubleChecked(holder) => holder.get_instance(),
         Self::AtomicOnce(holder) => holder.get_instance(),
      }
   }

   fn phase(&self) -> Phase {
      match self {
         Self::Eager(holder) => holder.phase(),
         Self::Holder(holder) => holder.phase(),
         Self::DoubleChecked(holder) => holder.phase(),
         Self::AtomicOnce(holder) => holder.phase(),
      }
   }

   fn strategy(&self) -> Strategy {
      match self {
         Self::Eager(_) => Strategy::Eager,
         Self::Holder(_) => Strategy::Holder,
         Self::DoubleChecked(_) => Strategy::DoubleChecked,
         Self::AtomicOnce(_) => Strategy::AtomicOnce,
      }
   }
}

impl<T: fmt::Debug, F> fmt::Debug for LazySingletonHolder<T, F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Eager(holder) => fmt::Debug::fmt(holder, f),
         Self::Holder(holder) => fmt::Debug::fmt(holder, f),
         Self::DoubleChecked(holder) => fmt::Debug::fmt(holder, f),
         Self::AtomicOnce(holder) => fmt::Debug::fmt(holder, f),
      }
   }
}
