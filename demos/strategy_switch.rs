//! Runs the same workload against whichever strategy is named on the
//! command line (`eager`, `holder`, `double-checked` or `atomic-once`).
//!
//! `RUST_LOG=lazy_holder=debug cargo run --example strategy_switch -- holder`

use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use lazy_holder::{LazySingletonHolder, SingletonHolder, Strategy};

static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

struct Catalog {
   entries: Vec<String>,
}

fn build_catalog() -> Result<Catalog, std::io::Error> {
   CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
   thread::sleep(Duration::from_millis(100));
   Ok(Catalog {
      entries: (0..1_000).map(|i| format!("entry-{i:04}")).collect(),
   })
}

fn main() -> ExitCode {
   tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .init();

   let strategy = match std::env::args().nth(1).map(|arg| arg.parse::<Strategy>()) {
      Some(Ok(strategy)) => strategy,
      Some(Err(err)) => {
         eprintln!("{err}");
         return ExitCode::FAILURE;
      }
      None => Strategy::DoubleChecked,
   };

   let started = Instant::now();
   // The eager strategy builds here; a failure is a startup failure.
   let holder = match LazySingletonHolder::new(strategy, build_catalog) {
      Ok(holder) => holder,
      Err(err) => {
         tracing::error!(%strategy, error = %err, "could not build the catalog");
         return ExitCode::FAILURE;
      }
   };
   println!(
      "{strategy}: holder ready after {:?}, constructed {} time(s), phase {}",
      started.elapsed(),
      CONSTRUCTED.load(Ordering::SeqCst),
      holder.phase(),
   );

   let barrier = Barrier::new(64);
   let total: usize = thread::scope(|s| {
      let handles: Vec<_> = (0..64)
         .map(|_| {
            s.spawn(|| {
               barrier.wait();
               holder.get_instance().map(|catalog| catalog.entries.len()).unwrap_or(0)
            })
         })
         .collect();
      handles.into_iter().map(|h| h.join().unwrap_or(0)).sum()
   });

   println!(
      "{strategy}: 64 readers saw {total} entries in total, constructed {} time(s), phase {}",
      CONSTRUCTED.load(Ordering::SeqCst),
      holder.phase(),
   );
   ExitCode::SUCCESS
}
