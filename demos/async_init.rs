use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_holder::AtomicOnce;
use tokio::time::{sleep, Duration};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

async fn load() -> Result<String, std::convert::Infallible> {
   // This async body runs only once
   COUNTER.fetch_add(1, Ordering::Relaxed);
   println!("Initializing async data...");
   sleep(Duration::from_millis(50)).await;
   Ok("Async expensive data".to_string())
}

#[tokio::main]
async fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .init();

   let holder: Arc<AtomicOnce<String, _>> = Arc::new(AtomicOnce::new(load));

   let tasks: Vec<_> = (0..5)
      .map(|_| {
         let holder = Arc::clone(&holder);
         tokio::spawn(async move {
            let data = holder.get_instance_async().await.unwrap();
            println!("Task access: {data}");
         })
      })
      .collect();

   for t in tasks {
      t.await.unwrap();
   }

   assert_eq!(holder.get(), Some(&"Async expensive data".to_string()));
   assert_eq!(COUNTER.load(Ordering::Relaxed), 1); // Factory ran only once
   println!("Final async data: {}", holder.get_instance_async().await.unwrap());
}
