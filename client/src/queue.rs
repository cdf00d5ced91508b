//! Bucket-gated serial action queues.
//!
//! Outgoing interactive actions (pixel placements, chat lines) funnel
//! through one queue per bucket. Items are processed strictly in enqueue
//! order by a single background drain task; each item's completion handle
//! resolves exactly once with the processor's result.

use crate::bucket::SharedBucket;
use crate::error::ClientError;
use futures::future::BoxFuture;
use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type Processor<T, R> = Box<dyn Fn(T) -> BoxFuture<'static, R> + Send + Sync>;

struct QueueInner<T, R> {
    name: String,
    bucket: SharedBucket,
    buffer: Mutex<VecDeque<(T, oneshot::Sender<R>)>>,
    draining: AtomicBool,
    closed: AtomicBool,
    processor: Processor<T, R>,
}

/// A FIFO of pending actions bound to exactly one [`SharedBucket`].
///
/// Cloning shares the underlying queue.
pub struct ActionQueue<T, R> {
    inner: Arc<QueueInner<T, R>>,
}

impl<T, R> Clone for ActionQueue<T, R> {
    fn clone(&self) -> Self {
        ActionQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, R> ActionQueue<T, R>
where
    T: Debug + Send + 'static,
    R: Send + 'static,
{
    pub fn new<F>(name: impl Into<String>, bucket: SharedBucket, processor: F) -> Self
    where
        F: Fn(T) -> BoxFuture<'static, R> + Send + Sync + 'static,
    {
        ActionQueue {
            inner: Arc::new(QueueInner {
                name: name.into(),
                bucket,
                buffer: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                processor: Box::new(processor),
            }),
        }
    }

    /// Appends an item and ensures a drain task is running. The returned
    /// receiver resolves when the item has been processed; callers may
    /// await it or drop it to fire and forget.
    pub fn enqueue(&self, payload: T) -> Result<oneshot::Receiver<R>, ClientError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::QueueClosed);
        }
        debug!("Queuing {} item: {:?}", self.inner.name, payload);
        let (tx, rx) = oneshot::channel();
        {
            let mut buffer = self.inner.buffer.lock().unwrap();
            buffer.push_back((payload, tx));
        }
        self.ensure_draining();
        Ok(rx)
    }

    /// Number of items waiting to be processed.
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuses further items and drops everything still queued; pending
    /// completion handles fail with a closed channel.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let dropped = {
            let mut buffer = self.inner.buffer.lock().unwrap();
            let dropped = buffer.len();
            buffer.clear();
            dropped
        };
        if dropped > 0 {
            debug!("Dropped {} queued {} item(s)", dropped, self.inner.name);
        }
    }

    /// Spawns the drain task unless one is already active. Exactly one
    /// task drains a queue at a time.
    fn ensure_draining(&self) {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            debug!("Starting {} drain task", inner.name);
            let mut count = 0usize;
            loop {
                loop {
                    // The guard must not live across the awaits below.
                    let next = inner.buffer.lock().unwrap().pop_front();
                    let Some((payload, tx)) = next else {
                        break;
                    };
                    if inner.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    // Wait for the bucket to regenerate, then claim one
                    // unit. The drain task is normally the only spender,
                    // but a lost race against a direct spend just means
                    // another wait; the item is never dropped.
                    loop {
                        inner.bucket.delay_any().await;
                        if inner.bucket.try_spend(1.0).await {
                            break;
                        }
                        warn!(
                            "{} drain lost an allowance race; waiting again",
                            inner.name
                        );
                    }
                    debug!("Processing {} item: {:?}", inner.name, payload);
                    let result = (inner.processor)(payload).await;
                    let _ = tx.send(result);
                    count += 1;
                }
                inner.draining.store(false, Ordering::SeqCst);
                // Re-arm if an item slipped in while the flag was being
                // cleared and no other task claimed it.
                if inner.buffer.lock().unwrap().is_empty()
                    || inner.draining.swap(true, Ordering::SeqCst)
                {
                    break;
                }
            }
            debug!("Completed {} drain task, {} item(s) sent", inner.name, count);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::TokenBucket;
    use futures::FutureExt;
    use std::time::Duration;

    fn instant_bucket() -> SharedBucket {
        let mut bucket = TokenBucket::new(1, 1, true);
        bucket.set_infinite(true);
        SharedBucket::new(bucket)
    }

    #[tokio::test]
    async fn test_items_process_in_enqueue_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        let queue = ActionQueue::new("test", instant_bucket(), move |n: u32| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(n);
                n * 2
            }
            .boxed()
        });

        let receivers: Vec<_> = (0..5).map(|n| queue.enqueue(n).unwrap()).collect();
        let mut results = Vec::new();
        for rx in receivers {
            results.push(rx.await.unwrap());
        }
        assert_eq!(results, vec![0, 2, 4, 6, 8]);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_processor_runs_exactly_once_per_item() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let queue = ActionQueue::new("count", instant_bucket(), move |_: ()| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock().unwrap() += 1;
            }
            .boxed()
        });

        let receivers: Vec<_> = (0..8).map(|_| queue.enqueue(()).unwrap()).collect();
        for rx in receivers {
            rx.await.unwrap();
        }
        assert_eq!(*calls.lock().unwrap(), 8);
    }

    #[tokio::test]
    async fn test_invocations_never_overlap() {
        let active = Arc::new(Mutex::new(0u32));
        let peak = Arc::new(Mutex::new(0u32));
        let (active_c, peak_c) = (Arc::clone(&active), Arc::clone(&peak));
        let queue = ActionQueue::new("overlap", instant_bucket(), move |_: u32| {
            let (active, peak) = (Arc::clone(&active_c), Arc::clone(&peak_c));
            async move {
                {
                    let mut a = active.lock().unwrap();
                    *a += 1;
                    let mut p = peak.lock().unwrap();
                    *p = (*p).max(*a);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                *active.lock().unwrap() -= 1;
            }
            .boxed()
        });

        let receivers: Vec<_> = (0..4).map(|n| queue.enqueue(n).unwrap()).collect();
        for rx in receivers {
            rx.await.unwrap();
        }
        assert_eq!(*peak.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_bucket() {
        // Two prefilled units refilling at two per second: three items
        // force at least one wait.
        let bucket = SharedBucket::new(TokenBucket::new(2, 1, true));
        let queue = ActionQueue::new("gated", bucket, |n: u32| async move { n }.boxed());
        let start = std::time::Instant::now();
        let receivers: Vec<_> = (0..3).map(|n| queue.enqueue(n).unwrap()).collect();
        for rx in receivers {
            rx.await.unwrap();
        }
        // The third item waited for a refill (500ms/unit plus margin).
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_receiver_pending_while_bucket_starved() {
        // No allowance and no refill rate: the item can never be paid
        // for, so its receiver must stay pending rather than resolve.
        let bucket = SharedBucket::new(TokenBucket::new(1, 0, false));
        let queue = ActionQueue::new("starved", bucket, |n: u32| async move { n }.boxed());
        let mut rx = tokio_test::task::spawn(queue.enqueue(7).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio_test::assert_pending!(rx.poll());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_drops() {
        let queue = ActionQueue::new("closed", instant_bucket(), |_: ()| async {}.boxed());
        queue.shutdown();
        assert!(matches!(
            queue.enqueue(()),
            Err(ClientError::QueueClosed)
        ));
    }
}
