use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};

use lazy_holder::{AtomicOnce, SingletonHolder};

static COUNTER: AtomicUsize = AtomicUsize::new(0);
static DATA: AtomicOnce<String, fn() -> Result<String, Infallible>> = AtomicOnce::new(load_data);

fn load_data() -> Result<String, Infallible> {
   // This runs only once
   COUNTER.fetch_add(1, Ordering::Relaxed);
   println!("Initializing data...");
   std::thread::sleep(std::time::Duration::from_millis(50));
   Ok("Expensive data".to_string())
}

fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .init();

   let threads: Vec<_> = (0..5)
      .map(|_| {
         std::thread::spawn(|| match DATA.get_instance() {
            Ok(data) => println!("Thread access: {data}"),
            Err(err) => println!("Thread failed: {err}"),
         })
      })
      .collect();

   for t in threads {
      t.join().unwrap();
   }

   assert_eq!(DATA.get(), Some(&"Expensive data".to_string()));
   assert_eq!(COUNTER.load(Ordering::Relaxed), 1); // Factory ran only once
   println!("Final data: {}", DATA.get_instance().unwrap());
}
