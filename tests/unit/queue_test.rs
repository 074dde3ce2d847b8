//! Tests for the bounded queue

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use task_dispatcher::infra::BoundedQueue;

#[test]
fn test_queue_matches_model_under_random_ops() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for capacity in [1, 2, 7, 32] {
        let queue = BoundedQueue::new(capacity);
        let mut model = VecDeque::new();

        for step in 0..2_000u32 {
            if rng.random_bool(0.6) {
                let accepted = queue.put(step).is_ok();
                assert_eq!(accepted, model.len() < capacity, "put at step {step}");
                if accepted {
                    model.push_back(step);
                }
            } else {
                assert_eq!(queue.try_get(), model.pop_front(), "get at step {step}");
            }
            assert!(queue.len() <= capacity);
            assert_eq!(queue.len(), model.len());
            assert_eq!(queue.is_full(), model.len() == capacity);
        }
    }
}

#[test]
fn test_queue_get_times_out_when_empty() {
    let queue: BoundedQueue<u8> = BoundedQueue::new(1);
    assert!(queue.is_empty());
    assert_eq!(queue.get(Duration::from_millis(5)), None);
}

#[test]
fn test_queue_rejected_item_is_returned() {
    let queue = BoundedQueue::new(1);
    queue.put(String::from("first")).unwrap();
    assert_eq!(queue.put(String::from("second")), Err(String::from("second")));
    assert_eq!(queue.capacity(), 1);
}
