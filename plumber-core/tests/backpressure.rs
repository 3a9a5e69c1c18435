//! Backpressure (spec §8): with the ring at capacity 4, emitting 10 events
//! while nothing drains the queue must block the 5th `post` until a `wait`
//! (the dispatcher's `take`) advances the queue by at least one slot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use plumber_core::equeue::{Event, EventQueue};
use plumber_core::pipe::ModuleId;

#[tokio::test]
async fn the_fifth_post_blocks_until_a_take_advances_the_queue() {
    let mut queue = EventQueue::new(4);
    let handle = queue.handle();
    let posted = Arc::new(AtomicUsize::new(0));

    let producer_posted = posted.clone();
    let producer = tokio::spawn(async move {
        for _ in 0..10 {
            handle.post(Event::Accept { module: 0 }).await.unwrap();
            producer_posted.fetch_add(1, Ordering::SeqCst);
        }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(posted.load(Ordering::SeqCst), 4, "the 5th post should block once the ring is full");

    let interest: HashSet<ModuleId> = [0].into_iter().collect();
    queue.wait(&interest).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(posted.load(Ordering::SeqCst), 5, "one take should unblock exactly one more post");

    for _ in 0..9 {
        queue.wait(&interest).await;
    }
    producer.await.unwrap();
    assert_eq!(posted.load(Ordering::SeqCst), 10);
}
