use std::sync::atomic::{AtomicBool, Ordering};

use lazy_holder::{DoubleChecked, SingletonHolder};

static FAIL: AtomicBool = AtomicBool::new(true);
static MAYBE_DATA: DoubleChecked<String, fn() -> Result<String, &'static str>> =
   DoubleChecked::new(connect);

fn connect() -> Result<String, &'static str> {
   let fail = FAIL.load(Ordering::SeqCst);
   println!("Attempting construction (fail={fail})...");
   if fail {
      Err("backend not ready")
   } else {
      Ok("Successfully initialized".to_string())
   }
}

fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .init();

   // First attempt fails and leaves the holder empty
   match MAYBE_DATA.get_instance() {
      Ok(_) => panic!("Should have failed"),
      Err(e) => println!("Caught error: {e}"),
   }
   assert!(!MAYBE_DATA.is_initialized());

   // Second attempt retries and succeeds
   FAIL.store(false, Ordering::SeqCst);
   match MAYBE_DATA.get_instance() {
      Ok(data) => println!("Got data: {data}"),
      Err(_) => panic!("Should have succeeded"),
   }
   assert!(MAYBE_DATA.is_initialized());

   // Once published, the factory is never consulted again
   FAIL.store(true, Ordering::SeqCst);
   match MAYBE_DATA.get_instance() {
      Ok(data) => println!("Got data again: {data}"),
      Err(_) => panic!("Should have returned existing data"),
   }
   assert_eq!(MAYBE_DATA.attempts(), 2);
}
