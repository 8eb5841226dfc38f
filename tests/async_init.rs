#![cfg(feature = "async-tokio-mt")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lazy_holder::{AtomicOnce, Once, Phase};

#[tokio::test]
async fn test_get_or_try_init_async() {
   let once: Once<String> = Once::new();
   let counter = Arc::new(AtomicUsize::new(0));

   let value = once
      .get_or_try_init_async(|| {
         let counter = Arc::clone(&counter);
         async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, &str>(String::from("async ok"))
         }
      })
      .await
      .unwrap();
   assert_eq!(value, "async ok");
   assert_eq!(counter.load(Ordering::SeqCst), 1);

   // Second call must not create the future at all
   let value = once
      .get_or_try_init_async(|| async {
         counter.fetch_add(1, Ordering::SeqCst);
         Ok::<_, &str>(String::from("ignored"))
      })
      .await
      .unwrap();
   assert_eq!(value, "async ok");
   assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_failure_then_retry() {
   let once: Once<u32> = Once::new();

   let err = once
      .get_or_try_init_async(|| async { Err::<u32, _>("async fail") })
      .await
      .unwrap_err();
   assert_eq!(err.attempt(), 1);
   assert_eq!(once.phase(), Phase::Uninitialized);

   let value = once
      .get_or_try_init_async(|| async { Ok::<_, &str>(11) })
      .await
      .unwrap();
   assert_eq!(value, &11);
   assert_eq!(once.attempts(), 2);
}

#[tokio::test]
async fn test_dropped_future_abandons_attempt() {
   let once: Once<u32> = Once::new();

   let pending = once.get_or_try_init_async(|| async {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok::<_, &str>(1)
   });
   let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;
   assert!(timed_out.is_err());
   assert_eq!(once.phase(), Phase::Uninitialized);

   let value = once
      .get_or_try_init_async(|| async { Ok::<_, &str>(2) })
      .await
      .unwrap();
   assert_eq!(value, &2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_atomic_once_async_single_construction() {
   let constructed = Arc::new(AtomicUsize::new(0));
   let holder: Arc<AtomicOnce<Vec<u8>, _>> = Arc::new(AtomicOnce::new({
      let constructed = Arc::clone(&constructed);
      move || {
         let constructed = Arc::clone(&constructed);
         async move {
            constructed.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, &str>(vec![0u8; 1024])
         }
      }
   }));

   let tasks: Vec<_> = (0..32)
      .map(|_| {
         let holder = Arc::clone(&holder);
         tokio::spawn(async move {
            let resource = holder.get_instance_async().await.unwrap();
            resource.as_ptr() as usize
         })
      })
      .collect();

   let mut addresses = Vec::new();
   for task in tasks {
      addresses.push(task.await.unwrap());
   }

   assert!(addresses.iter().all(|a| *a == addresses[0]));
   assert_eq!(constructed.load(Ordering::SeqCst), 1);
   assert_eq!(holder.attempts(), 1);
   assert_eq!(holder.phase(), Phase::Initialized);
}
